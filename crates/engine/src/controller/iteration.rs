// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `run_working_on_bead`: the per-issue iteration algorithm.

use super::{Controller, DrainState, Signals, StallContext};
use crate::event_bus::EventReceiver;
use crate::work_queue::BeadState;
use drain_adapters::{SessionOutcome, SessionRunner, SpawnConfig, TrackerClient, TurnBoundaryFn};
use drain_core::{Bead, BeadId, BeadStatus, Clock, Event, Severity, StallType};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one subprocess attempt, already resolved against signals.
enum Attempt {
    Finished(SessionOutcome),
    SpawnFailed(String),
    ForceStopped,
}

impl<T, R, C> Controller<T, R, C>
where
    T: TrackerClient,
    R: SessionRunner,
    C: Clock,
{
    pub(super) async fn run_working_on_bead(self: &Arc<Self>, bead: Bead, signals: &mut Signals) {
        let attempt_num = self.work_queue.entry(&bead.id).map(|e| e.attempts).unwrap_or(1);
        let top_level = self.work_queue.active_top_level();

        self.emit(Event::IterationStart {
            timestamp: self.clock.now(),
            bead_id: bead.id.clone(),
            title: bead.title.clone(),
            priority: bead.priority,
            attempt: attempt_num,
            top_level_id: top_level.as_ref().map(|(id, _)| id.clone()),
            top_level_title: top_level.as_ref().map(|(_, title)| title.clone()),
        });

        self.turn_count.store(0, Ordering::SeqCst);
        let started_at = self.clock.now();

        // Step 5: subscribe before the subprocess starts, so no bead created
        // during the session window is missed.
        let mut bead_events = self.event_bus.subscribe();
        let last_session_id = self.work_queue.entry(&bead.id).and_then(|e| e.last_session_id);

        let label = bead.labels.first().map(String::as_str);
        let prompt = self.prompt.expand(&bead, label);

        self.emit(Event::SessionStart {
            timestamp: self.clock.now(),
            bead_id: bead.id.clone(),
            title: bead.title.clone(),
        });

        let attempt = self
            .spawn_and_drive(&bead, prompt, last_session_id, None, signals)
            .await;

        let outcome = match attempt {
            Attempt::ForceStopped => {
                self.transition(DrainState::Stopping);
                return;
            }
            Attempt::SpawnFailed(message) => {
                self.record_failure(&bead, &message);
                self.emit_iteration_end(&bead, started_at, 0, 0.0, None, Some(message));
                return;
            }
            Attempt::Finished(outcome) => outcome,
        };

        self.work_queue
            .set_last_session_id(&bead.id, outcome.session_id.clone());

        if outcome.graceful_pause {
            // Step 7: no success/failure recorded; attempts already bumped
            // by selection, status stays `working`.
            self.transition(DrainState::Paused);
            return;
        }

        if let Some(error) = &outcome.error {
            self.record_failure(&bead, error);
            self.emit_iteration_end(
                &bead,
                started_at,
                outcome.num_turns,
                outcome.total_cost_usd,
                outcome.session_id.clone(),
                Some(error.clone()),
            );
            return;
        }

        // Step 8: ground truth.
        if self.bead_is_done(&bead.id).await {
            self.on_iteration_success(&bead, started_at, outcome, &mut bead_events).await;
            return;
        }

        self.run_follow_up(&bead, outcome, started_at, signals, &mut bead_events)
            .await;
    }

    /// Records a failed attempt and, if that was the one that tipped the
    /// bead into `abandoned`, emits `bead.abandoned`.
    fn record_failure(&self, bead: &Bead, message: &str) {
        self.work_queue.record_failure(&bead.id, message);
        let (state, attempts, _) = self.work_queue.bead_state(&bead.id);
        if state == BeadState::Abandoned {
            self.emit(Event::BeadAbandoned {
                timestamp: self.clock.now(),
                bead_id: bead.id.clone(),
                attempts,
                max_failures: self.work_queue.max_failures(),
                last_error: Some(message.to_string()),
            });
        }
    }

    async fn bead_is_done(&self, id: &BeadId) -> bool {
        match self.tracker.show(id).await {
            Ok(Some(bead)) => bead.status.is_done(),
            Ok(None) => false,
            Err(e) => {
                self.emit(Event::Error {
                    timestamp: self.clock.now(),
                    message: format!("ground-truth check failed for {id}: {e}"),
                    severity: Severity::Warning,
                });
                false
            }
        }
    }

    /// Spawns the agent and drives it to completion, racing the signal
    /// channels against the outcome so a mid-session pause/stop is observed
    /// without blocking on the subprocess.
    async fn spawn_and_drive(
        self: &Arc<Self>,
        bead: &Bead,
        prompt: String,
        resume_session_id: Option<String>,
        max_turns: Option<u32>,
        signals: &mut Signals,
    ) -> Attempt {
        let turn_count = Arc::clone(&self.turn_count);
        let on_turn: TurnBoundaryFn = Arc::new(move |turns| {
            turn_count.store(turns, Ordering::SeqCst);
        });

        let config = SpawnConfig {
            command: self.config.command.clone(),
            prompt: prompt.clone(),
            resume_session_id: resume_session_id.clone(),
            cwd: self.config.cwd.clone(),
            env: self.config.env.clone(),
            max_turns,
        };

        let mut handle = match self.runner.start(config, Arc::clone(&on_turn)).await {
            Ok(handle) => handle,
            Err(e) if resume_session_id.is_some() => {
                tracing::warn!(bead = %bead.id, error = %e, "resume spawn failed, retrying without --resume");
                let fresh = SpawnConfig {
                    command: self.config.command.clone(),
                    prompt,
                    resume_session_id: None,
                    cwd: self.config.cwd.clone(),
                    env: self.config.env.clone(),
                    max_turns,
                };
                match self.runner.start(fresh, on_turn).await {
                    Ok(handle) => handle,
                    Err(e) => return Attempt::SpawnFailed(e.to_string()),
                }
            }
            Err(e) => return Attempt::SpawnFailed(e.to_string()),
        };

        let mut force_stopped = false;
        loop {
            tokio::select! {
                biased;
                _ = signals.stop.recv() => {
                    force_stopped = true;
                    handle.stop();
                }
                _ = signals.graceful_stop.recv() => {
                    // Let the session run to completion; record the request
                    // and stop after this iteration instead of killing it.
                    self.graceful_stop_requested.store(true, Ordering::SeqCst);
                }
                _ = signals.pause.recv() => {
                    handle.request_pause();
                }
                _ = signals.graceful_pause.recv() => {
                    handle.request_pause();
                }
                result = handle.wait() => {
                    return if force_stopped {
                        Attempt::ForceStopped
                    } else {
                        match result {
                            Ok(outcome) => Attempt::Finished(outcome),
                            Err(e) => Attempt::SpawnFailed(e.to_string()),
                        }
                    };
                }
            }
        }
    }

    fn emit_iteration_end(
        &self,
        bead: &Bead,
        started_at: chrono::DateTime<chrono::Utc>,
        num_turns: u32,
        total_cost_usd: f64,
        session_id: Option<String>,
        error: Option<String>,
    ) {
        let now = self.clock.now();
        let duration_ms = (now - started_at).num_milliseconds().max(0) as u64;
        self.emit(Event::IterationEnd {
            timestamp: now,
            bead_id: bead.id.clone(),
            success: error.is_none(),
            num_turns,
            duration_ms,
            total_cost_usd,
            error,
            session_id,
        });
    }

    async fn on_iteration_success(
        self: &Arc<Self>,
        bead: &Bead,
        started_at: chrono::DateTime<chrono::Utc>,
        outcome: SessionOutcome,
        bead_events: &mut EventReceiver,
    ) {
        self.work_queue.record_success(&bead.id);
        self.emit_iteration_end(
            bead,
            started_at,
            outcome.num_turns,
            outcome.total_cost_usd,
            outcome.session_id.clone(),
            None,
        );

        // Best-effort, asynchronous side effect: failures are logged, never
        // propagated to the caller.
        {
            let controller = Arc::clone(self);
            let bead_id = bead.id.clone();
            tokio::spawn(async move {
                controller.close_eligible_epics(&bead_id).await;
            });
        }

        let created = self
            .collect_created_beads(bead_events, self.config.review_debounce)
            .await;

        if !created.is_empty() {
            self.enter_review_stall(bead, created);
            return;
        }

        self.maybe_eager_switch().await;
    }

    async fn close_eligible_epics(&self, triggering_bead_id: &BeadId) {
        match self.tracker.close_eligible_epics().await {
            Ok(closed) => {
                for epic in closed {
                    self.emit(Event::EpicClosed {
                        timestamp: self.clock.now(),
                        epic_id: epic.id,
                        title: epic.title,
                        total_children: epic.dependent_count,
                        triggering_bead_id: triggering_bead_id.clone(),
                        close_reason: "all dependents closed".into(),
                    });
                }
            }
            Err(e) => {
                self.emit(Event::Error {
                    timestamp: self.clock.now(),
                    message: format!("close_eligible_epics failed: {e}"),
                    severity: Severity::Warning,
                });
            }
        }
    }

    /// Drains `bead_events` for up to `window`, keeping only newly-created
    /// beads attributed to this controller.
    async fn collect_created_beads(&self, bead_events: &mut EventReceiver, window: Duration) -> Vec<BeadId> {
        let mut created = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, bead_events.recv()).await {
                Ok(Some(Event::BeadChanged { bead_id, old_state, new_state, .. })) => {
                    if old_state.is_none() {
                        if let Some(new_state) = new_state {
                            if new_state.created_by == "atari-drain" {
                                created.push(bead_id);
                            }
                        }
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => break,
            }
        }
        created
    }

    fn enter_review_stall(&self, bead: &Bead, created_beads: Vec<BeadId>) {
        let reason = format!(
            "{} new bead(s) created during work on {} need review",
            created_beads.len(),
            bead.id
        );
        *self.stall.lock() = Some(StallContext {
            bead_id: Some(bead.id.clone()),
            bead_title: Some(bead.title.clone()),
            reason: reason.clone(),
            stall_type: StallType::Review,
            created_beads: created_beads.clone(),
        });
        self.emit(Event::Stall {
            timestamp: self.clock.now(),
            bead_id: Some(bead.id.clone()),
            title: Some(bead.title.clone()),
            reason,
            stall_type: StallType::Review,
            created_beads,
        });
        self.transition(DrainState::Stalled);
    }

    /// Clears the active top-level item if a strictly higher-priority one
    /// has ready work. Backs the eager-switch check.
    async fn maybe_eager_switch(&self) {
        if !self.work_queue.config().eager_switch {
            return;
        }
        let Some((active_id, _)) = self.work_queue.active_top_level() else {
            return;
        };
        let all = match self.tracker.list(None).await {
            Ok(all) => all,
            Err(_) => return,
        };
        let Some(active) = all.iter().find(|b| b.id == active_id) else {
            return;
        };
        let active_priority = active.priority;
        let has_higher_priority_ready = all
            .iter()
            .filter(|b| b.is_top_level() && b.priority < active_priority)
            .any(|candidate| self.work_queue.has_ready_work_under(&candidate.id, &all));
        if has_higher_priority_ready {
            self.work_queue.set_active_top_level(None);
        }
    }

    /// Shorter-turn-limit, no-resume second pass after a main session that
    /// did not close the bead: a follow-up session.
    async fn run_follow_up(
        self: &Arc<Self>,
        bead: &Bead,
        main_outcome: SessionOutcome,
        started_at: chrono::DateTime<chrono::Utc>,
        signals: &mut Signals,
        bead_events: &mut EventReceiver,
    ) {
        let label = bead.labels.first().map(String::as_str);
        let prompt = self.follow_up_prompt.expand(bead, label);

        self.emit(Event::SessionStart {
            timestamp: self.clock.now(),
            bead_id: bead.id.clone(),
            title: format!("{} (follow-up)", bead.title),
        });

        let attempt = self
            .spawn_and_drive(
                bead,
                prompt,
                None,
                Some(self.config.follow_up_turn_limit),
                signals,
            )
            .await;

        let follow_up_outcome = match attempt {
            Attempt::ForceStopped => {
                self.transition(DrainState::Stopping);
                return;
            }
            Attempt::SpawnFailed(message) => {
                self.record_failure(bead, &message);
                self.emit_iteration_end(bead, started_at, main_outcome.num_turns, main_outcome.total_cost_usd, main_outcome.session_id, Some(message));
                return;
            }
            Attempt::Finished(outcome) => outcome,
        };

        if follow_up_outcome.graceful_pause {
            self.transition(DrainState::Paused);
            return;
        }

        let combined_turns = main_outcome.num_turns + follow_up_outcome.num_turns;
        let combined_cost = main_outcome.total_cost_usd + follow_up_outcome.total_cost_usd;
        let session_id = follow_up_outcome.session_id.clone().or(main_outcome.session_id);

        if let Some(error) = &follow_up_outcome.error {
            self.record_failure(bead, error);
            self.emit_iteration_end(bead, started_at, combined_turns, combined_cost, session_id, Some(error.clone()));
            return;
        }

        if self.bead_is_done(&bead.id).await {
            let outcome = SessionOutcome {
                num_turns: combined_turns,
                total_cost_usd: combined_cost,
                session_id,
                graceful_pause: false,
                error: None,
                invalid_lines: main_outcome.invalid_lines + follow_up_outcome.invalid_lines,
            };
            self.on_iteration_success(bead, started_at, outcome, bead_events).await;
            return;
        }

        // Step 11: best-effort reset, then record a non-progressive failure.
        if let Err(e) = self
            .tracker
            .update_status(&bead.id, BeadStatus::Open, "Atari: agent did not close this issue")
            .await
        {
            self.emit(Event::Error {
                timestamp: self.clock.now(),
                message: format!("best-effort status reset failed for {}: {e}", bead.id),
                severity: Severity::Warning,
            });
        }
        let error = "agent completed without closing the issue".to_string();
        self.record_failure(bead, &error);
        self.emit_iteration_end(bead, started_at, combined_turns, combined_cost, session_id, Some(error));
    }
}
