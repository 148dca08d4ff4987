// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The drain-loop state machine.

mod iteration;

use crate::event_bus::{EventBus, EventReceiver};
use crate::prompt::{PromptTemplate, DEFAULT_FOLLOW_UP_TEMPLATE, DEFAULT_TEMPLATE};
use crate::work_queue::WorkQueue;
use drain_adapters::{SessionRunner, TrackerClient};
use drain_core::{BeadId, Clock, Event, SelectionReason, Severity, StallClearAction, StallType, StateSnapshot};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// States the controller can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Idle,
    Working,
    Paused,
    Stalled,
    Stopping,
    Stopped,
}

impl DrainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainState::Idle => "idle",
            DrainState::Working => "working",
            DrainState::Paused => "paused",
            DrainState::Stalled => "stalled",
            DrainState::Stopping => "stopping",
            DrainState::Stopped => "stopped",
        }
    }

    /// External "agent state" mapping for operator dashboards.
    pub fn reported(&self) -> &'static str {
        match self {
            DrainState::Idle => "idle",
            DrainState::Working => "running",
            DrainState::Paused => "idle",
            DrainState::Stalled => "stalled",
            DrainState::Stopping => "stopped",
            DrainState::Stopped => "dead",
        }
    }
}

/// Context recorded while stalled.
#[derive(Debug, Clone)]
pub struct StallContext {
    pub bead_id: Option<BeadId>,
    pub bead_title: Option<String>,
    pub reason: String,
    pub stall_type: StallType,
    pub created_beads: Vec<BeadId>,
}

/// Validation / fatal startup errors.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("configured epic {0} does not exist")]
    EpicNotFound(String),
    #[error("configured epic {0} is not an epic (issue_type mismatch)")]
    EpicTypeMismatch(String),
    #[error("tracker error during startup validation: {0}")]
    Tracker(#[from] drain_adapters::TrackerError),
    #[error("run() was already called on this controller")]
    AlreadyRunning,
}

/// Single-slot coalescing signal: a bounded(1) channel where additional
/// sends while one is pending are silently dropped.
#[derive(Clone)]
struct SignalTx(mpsc::Sender<()>);

impl SignalTx {
    fn send(&self) {
        let _ = self.0.try_send(());
    }
}

fn signal_pair() -> (SignalTx, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (SignalTx(tx), rx)
}

struct Signals {
    pause: mpsc::Receiver<()>,
    graceful_pause: mpsc::Receiver<()>,
    resume: mpsc::Receiver<()>,
    stop: mpsc::Receiver<()>,
    graceful_stop: mpsc::Receiver<()>,
    retry: mpsc::Receiver<()>,
}

/// Operator-facing control surface: `pause`, `resume`, `stop`, `retry`,
/// `status`, `events`, plus the two reset operations below.
#[derive(Clone)]
pub struct ControllerHandle {
    pause_tx: SignalTx,
    graceful_pause_tx: SignalTx,
    resume_tx: SignalTx,
    stop_tx: SignalTx,
    graceful_stop_tx: SignalTx,
    retry_tx: SignalTx,
    state: Arc<Mutex<DrainState>>,
    current_bead: Arc<Mutex<Option<BeadId>>>,
    stall: Arc<Mutex<Option<StallContext>>>,
    turn_count: Arc<AtomicU32>,
    event_bus: EventBus,
    reset_history_fn: Arc<dyn Fn(&BeadId) + Send + Sync>,
    reset_bead_fn: Arc<dyn Fn(&BeadId) + Send + Sync>,
}

/// A snapshot of controller status for operator dashboards.
#[derive(Debug, Clone)]
pub struct Status {
    pub state: &'static str,
    pub reported_state: &'static str,
    pub current_bead: Option<BeadId>,
    pub current_turn: u32,
    pub stall_reason: Option<String>,
}

impl ControllerHandle {
    pub fn pause(&self) {
        self.pause_tx.send();
    }

    pub fn graceful_pause(&self) {
        self.graceful_pause_tx.send();
    }

    pub fn resume(&self) {
        self.resume_tx.send();
    }

    pub fn stop(&self) {
        self.stop_tx.send();
    }

    pub fn graceful_stop(&self) {
        self.graceful_stop_tx.send();
    }

    pub fn retry(&self) {
        self.retry_tx.send();
    }

    /// Clears a bead's recorded history entirely, e.g. after fixing the
    /// underlying issue out of band.
    pub fn reset_history(&self, id: &BeadId) {
        (self.reset_history_fn)(id);
    }

    /// Resets a bead's attempts/status to `pending` without forgetting it,
    /// making it immediately eligible for selection again.
    pub fn reset_bead(&self, id: &BeadId) {
        (self.reset_bead_fn)(id);
    }

    pub fn status(&self) -> Status {
        let state = *self.state.lock();
        let stall = self.stall.lock();
        Status {
            state: state.as_str(),
            reported_state: state.reported(),
            current_bead: self.current_bead.lock().clone(),
            current_turn: self.turn_count.load(Ordering::SeqCst),
            stall_reason: stall.as_ref().map(|s| s.reason.clone()),
        }
    }

    pub fn events(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }
}

/// Tunables for one controller instance.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub poll_interval: Duration,
    pub follow_up_turn_limit: u32,
    pub review_debounce: Duration,
    pub command: String,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub prompt_template_path: Option<PathBuf>,
    pub follow_up_template_path: Option<PathBuf>,
    pub epic: Option<BeadId>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            follow_up_turn_limit: 5,
            review_debounce: Duration::from_millis(300),
            command: "claude".into(),
            cwd: PathBuf::from("."),
            env: Vec::new(),
            prompt_template_path: None,
            follow_up_template_path: None,
            epic: None,
        }
    }
}

/// Owns the drain loop: selection, session orchestration, and state
/// transitions. Generic over the tracker/runner/clock so tests can swap in
/// fakes.
pub struct Controller<T, R, C>
where
    T: TrackerClient,
    R: SessionRunner,
    C: Clock,
{
    tracker: Arc<T>,
    runner: Arc<R>,
    clock: C,
    work_queue: WorkQueue<C>,
    event_bus: EventBus,
    config: ControllerConfig,
    state: Arc<Mutex<DrainState>>,
    current_bead: Arc<Mutex<Option<BeadId>>>,
    stall: Arc<Mutex<Option<StallContext>>>,
    turn_count: Arc<AtomicU32>,
    /// Set when a `graceful_stop` arrives mid-iteration; the running session
    /// is left alone and this is consumed once the iteration finishes, at
    /// the next check before selecting a new bead.
    graceful_stop_requested: std::sync::atomic::AtomicBool,
    prompt: PromptTemplate,
    follow_up_prompt: PromptTemplate,
    handle: ControllerHandle,
    signals: Mutex<Option<Signals>>,
}

impl<T, R, C> Controller<T, R, C>
where
    T: TrackerClient,
    R: SessionRunner,
    C: Clock,
{
    pub fn new(
        tracker: Arc<T>,
        runner: Arc<R>,
        clock: C,
        work_queue: WorkQueue<C>,
        event_bus: EventBus,
        config: ControllerConfig,
    ) -> Self {
        let prompt = PromptTemplate::load(config.prompt_template_path.as_deref(), DEFAULT_TEMPLATE);
        let follow_up_prompt = PromptTemplate::load(
            config.follow_up_template_path.as_deref(),
            DEFAULT_FOLLOW_UP_TEMPLATE,
        );

        let (pause_tx, pause_rx) = signal_pair();
        let (graceful_pause_tx, graceful_pause_rx) = signal_pair();
        let (resume_tx, resume_rx) = signal_pair();
        let (stop_tx, stop_rx) = signal_pair();
        let (graceful_stop_tx, graceful_stop_rx) = signal_pair();
        let (retry_tx, retry_rx) = signal_pair();

        let state = Arc::new(Mutex::new(DrainState::Idle));
        let current_bead = Arc::new(Mutex::new(None));
        let stall = Arc::new(Mutex::new(None));
        let turn_count = Arc::new(AtomicU32::new(0));

        let reset_history_wq = work_queue.clone();
        let reset_bead_wq = work_queue.clone();

        let handle = ControllerHandle {
            pause_tx,
            graceful_pause_tx,
            resume_tx,
            stop_tx,
            graceful_stop_tx,
            retry_tx,
            state: Arc::clone(&state),
            current_bead: Arc::clone(&current_bead),
            stall: Arc::clone(&stall),
            turn_count: Arc::clone(&turn_count),
            event_bus: event_bus.clone(),
            reset_history_fn: Arc::new(move |id| reset_history_wq.reset_history(id)),
            reset_bead_fn: Arc::new(move |id| reset_bead_wq.reset_bead(id)),
        };

        Self {
            tracker,
            runner,
            clock,
            work_queue,
            event_bus,
            config,
            state,
            current_bead,
            stall,
            turn_count,
            graceful_stop_requested: std::sync::atomic::AtomicBool::new(false),
            prompt,
            follow_up_prompt,
            handle,
            signals: Mutex::new(Some(Signals {
                pause: pause_rx,
                graceful_pause: graceful_pause_rx,
                resume: resume_rx,
                stop: stop_rx,
                graceful_stop: graceful_stop_rx,
                retry: retry_rx,
            })),
        }
    }

    /// Restores runtime state from a loaded snapshot, so a freshly started
    /// controller resumes exactly where the last one left off.
    pub fn restore_from_snapshot(&self, snapshot: StateSnapshot) {
        self.work_queue.set_history(snapshot.history);
        if let Some(id) = snapshot.active_top_level {
            self.work_queue
                .set_active_top_level(Some((id, snapshot.active_top_level_title.unwrap_or_default())));
        }
        if let Some(bead_id) = snapshot.stalled_bead_id {
            *self.stall.lock() = Some(StallContext {
                bead_id: Some(bead_id),
                bead_title: snapshot.stalled_bead_title,
                reason: snapshot.stall_reason.unwrap_or_default(),
                stall_type: snapshot.stall_type.unwrap_or(StallType::Abandoned),
                created_beads: snapshot.created_beads,
            });
            *self.state.lock() = DrainState::Stalled;
        }
    }

    /// A cloneable control-surface handle, wired to this controller's
    /// signal channels. Cheap to clone; callers typically hand one to the
    /// daemon's listener and keep another for tests.
    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    fn transition(&self, to: DrainState) {
        let mut state = self.state.lock();
        let from = *state;
        if from == to {
            return;
        }
        *state = to;
        drop(state);
        self.event_bus.emit(Event::DrainStateChanged {
            timestamp: self.clock.now(),
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        });
    }

    fn emit(&self, event: Event) {
        self.event_bus.emit(event);
    }

    /// Runs the drain loop until `stop`/`graceful_stop` moves it to
    /// `stopped`. Must be called at most once per controller instance.
    pub async fn run(self: &Arc<Self>, work_dir: &str) -> Result<(), ControllerError> {
        let mut signals = self
            .signals
            .lock()
            .take()
            .ok_or(ControllerError::AlreadyRunning)?;

        self.validate_epic().await?;

        self.emit(Event::DrainStart {
            timestamp: self.clock.now(),
            work_dir: work_dir.to_string(),
        });

        loop {
            let state = *self.state.lock();
            match state {
                DrainState::Stopped => break,
                DrainState::Stopping => {
                    self.transition(DrainState::Stopped);
                }
                DrainState::Paused => {
                    self.await_paused_signal(&mut signals).await;
                }
                DrainState::Stalled => {
                    self.await_stalled_signal(&mut signals).await;
                }
                DrainState::Idle | DrainState::Working => {
                    self.drive_idle_or_working(&mut signals).await;
                }
            }
        }

        self.emit(Event::DrainStop {
            timestamp: self.clock.now(),
            reason: "run loop exited".into(),
        });
        Ok(())
    }

    async fn validate_epic(&self) -> Result<(), ControllerError> {
        let Some(epic_id) = self.config.epic.clone() else {
            return Ok(());
        };
        match self.tracker.show(&epic_id).await? {
            None => Err(ControllerError::EpicNotFound(epic_id.as_str().to_string())),
            Some(bead) if !bead.is_epic() => {
                Err(ControllerError::EpicTypeMismatch(epic_id.as_str().to_string()))
            }
            Some(_) => Ok(()),
        }
    }

    async fn await_paused_signal(&self, signals: &mut Signals) {
        tokio::select! {
            _ = signals.resume.recv() => self.transition(DrainState::Idle),
            _ = signals.stop.recv() => self.transition(DrainState::Stopping),
            _ = signals.graceful_stop.recv() => self.transition(DrainState::Stopping),
        }
    }

    async fn await_stalled_signal(&self, signals: &mut Signals) {
        tokio::select! {
            _ = signals.retry.recv() => {
                if let Some(ctx) = self.stall.lock().take() {
                    if let Some(id) = &ctx.bead_id {
                        self.work_queue.reset_history(id);
                    }
                    self.emit(Event::StallCleared {
                        timestamp: self.clock.now(),
                        bead_id: ctx.bead_id,
                        action: StallClearAction::Retry,
                    });
                }
                self.transition(DrainState::Idle);
            }
            _ = signals.resume.recv() => {
                let ctx = self.stall.lock().take();
                if let Some(ctx) = ctx {
                    if ctx.stall_type == StallType::Abandoned {
                        if let Some(id) = &ctx.bead_id {
                            self.work_queue.record_skipped(id);
                        }
                    }
                    self.emit(Event::StallCleared {
                        timestamp: self.clock.now(),
                        bead_id: ctx.bead_id,
                        action: StallClearAction::Resume,
                    });
                }
                self.transition(DrainState::Idle);
            }
            _ = signals.stop.recv() => self.transition(DrainState::Stopping),
            _ = signals.graceful_stop.recv() => self.transition(DrainState::Stopping),
            _ = tokio::time::sleep(self.config.poll_interval) => {
                self.check_stall_auto_clear().await;
            }
        }
    }

    /// periodic check: a stalled bead disappeared from the tracker.
    async fn check_stall_auto_clear(&self) {
        let bead_id = {
            let stall = self.stall.lock();
            stall.as_ref().and_then(|s| s.bead_id.clone())
        };
        let Some(bead_id) = bead_id else { return };
        match self.tracker.show(&bead_id).await {
            Ok(None) => {
                self.stall.lock().take();
                self.emit(Event::StallCleared {
                    timestamp: self.clock.now(),
                    bead_id: Some(bead_id),
                    action: StallClearAction::AutoCleared,
                });
                self.transition(DrainState::Idle);
            }
            Ok(Some(_)) => {}
            Err(e) => {
                self.emit(Event::Error {
                    timestamp: self.clock.now(),
                    message: format!("stall auto-clear poll failed: {e}"),
                    severity: Severity::Warning,
                });
            }
        }
    }

    /// Non-blocking check for a pending pause/stop signal, and (when idle
    /// or working) one iteration of selection + session orchestration.
    async fn drive_idle_or_working(self: &Arc<Self>, signals: &mut Signals) {
        if signals.stop.try_recv().is_ok() || signals.graceful_stop.try_recv().is_ok() {
            self.transition(DrainState::Stopping);
            return;
        }
        if signals.pause.try_recv().is_ok() || signals.graceful_pause.try_recv().is_ok() {
            self.transition(DrainState::Paused);
            return;
        }

        let selection = self.work_queue.next_top_level(self.tracker.as_ref()).await;
        let (bead, reason) = match selection {
            Ok(pair) => pair,
            Err(e) => {
                self.emit(Event::Error {
                    timestamp: self.clock.now(),
                    message: format!("tracker ready poll failed: {e}"),
                    severity: Severity::Warning,
                });
                tokio::time::sleep(self.config.poll_interval).await;
                return;
            }
        };

        let Some(bead) = bead else {
            if reason == SelectionReason::MaxFailure {
                self.enter_abandoned_stall();
                return;
            }
            tokio::time::sleep(self.config.poll_interval).await;
            return;
        };

        self.transition(DrainState::Working);
        *self.current_bead.lock() = Some(bead.id.clone());
        self.run_working_on_bead(bead, signals).await;
        *self.current_bead.lock() = None;

        if self.graceful_stop_requested.swap(false, Ordering::SeqCst) {
            self.transition(DrainState::Stopping);
            return;
        }

        let settled = matches!(*self.state.lock(), DrainState::Paused | DrainState::Stopping | DrainState::Stalled);
        if !settled {
            self.transition(DrainState::Idle);
        }
    }

    fn enter_abandoned_stall(&self) {
        let reason = "all ready beads are at max failures".to_string();
        *self.stall.lock() = Some(StallContext {
            bead_id: None,
            bead_title: None,
            reason: reason.clone(),
            stall_type: StallType::Abandoned,
            created_beads: Vec::new(),
        });
        self.emit(Event::Stall {
            timestamp: self.clock.now(),
            bead_id: None,
            title: None,
            reason,
            stall_type: StallType::Abandoned,
            created_beads: Vec::new(),
        });
        self.transition(DrainState::Stalled);
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
