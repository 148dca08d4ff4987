use super::*;
use crate::work_queue::WorkQueueConfig;
use async_trait::async_trait;
use chrono::DateTime;
use drain_adapters::{
    ClosedEpic, FakeSessionRunner, FakeTrackerClient, ReadyFilter, ScriptedSession, StatusFilter,
    TrackerError,
};
use drain_core::{BackoffSchedule, Bead, BeadStatus, FakeClock, IssueType};
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::time::Duration;

fn bead(id: &str, issue_type: IssueType, parent: Option<&str>) -> Bead {
    Bead {
        id: BeadId::new(id),
        title: format!("bead {id}"),
        description: "do the thing".into(),
        status: BeadStatus::Open,
        priority: 1,
        issue_type,
        parent: parent.map(BeadId::new),
        labels: vec![],
        created_at: DateTime::UNIX_EPOCH,
        created_by: "someone".into(),
        updated_at: None,
    }
}

fn task(id: &str) -> Bead {
    bead(id, IssueType::Task, None)
}

fn work_queue(clock: FakeClock, max_failures: u32) -> WorkQueue<FakeClock> {
    WorkQueue::new(
        WorkQueueConfig::default(),
        BackoffSchedule::default(),
        max_failures,
        clock,
    )
}

fn controller(
    tracker: FakeTrackerClient,
    runner: FakeSessionRunner,
    clock: FakeClock,
    max_failures: u32,
) -> Arc<Controller<FakeTrackerClient, FakeSessionRunner, FakeClock>> {
    controller_with_tracker(tracker, runner, clock, max_failures, ControllerConfig::default())
}

fn controller_with_tracker<T: TrackerClient>(
    tracker: T,
    runner: FakeSessionRunner,
    clock: FakeClock,
    max_failures: u32,
    config: ControllerConfig,
) -> Arc<Controller<T, FakeSessionRunner, FakeClock>> {
    let queue = work_queue(clock.clone(), max_failures);
    Arc::new(Controller::new(
        Arc::new(tracker),
        Arc::new(runner),
        clock,
        queue,
        EventBus::new(),
        config,
    ))
}

/// Keeps every signal sender alive for the test's duration: a dropped sender
/// makes its matching `Receiver::recv()` resolve immediately with `None`,
/// which would be misread as a real signal by `select!`'s `_` patterns.
struct TestSignals {
    signals: Signals,
    pause_tx: SignalTx,
    graceful_pause_tx: SignalTx,
    resume_tx: SignalTx,
    stop_tx: SignalTx,
    graceful_stop_tx: SignalTx,
    retry_tx: SignalTx,
}

fn test_signals() -> TestSignals {
    let (pause_tx, pause) = signal_pair();
    let (graceful_pause_tx, graceful_pause) = signal_pair();
    let (resume_tx, resume) = signal_pair();
    let (stop_tx, stop) = signal_pair();
    let (graceful_stop_tx, graceful_stop) = signal_pair();
    let (retry_tx, retry) = signal_pair();
    TestSignals {
        signals: Signals {
            pause,
            graceful_pause,
            resume,
            stop,
            graceful_stop,
            retry,
        },
        pause_tx,
        graceful_pause_tx,
        resume_tx,
        stop_tx,
        graceful_stop_tx,
        retry_tx,
    }
}

/// Delegates to a [`FakeTrackerClient`], except its `show` closes the bead
/// once called `close_after` times — simulates the tracker's ground truth
/// flipping to closed partway through a multi-session iteration, without a
/// real race against the scripted session's background task.
struct ShowCountingTracker {
    inner: FakeTrackerClient,
    show_calls: AtomicU32,
    close_after: u32,
}

impl ShowCountingTracker {
    fn new(inner: FakeTrackerClient, close_after: u32) -> Self {
        Self {
            inner,
            show_calls: AtomicU32::new(0),
            close_after,
        }
    }
}

#[async_trait]
impl TrackerClient for ShowCountingTracker {
    async fn show(&self, id: &BeadId) -> Result<Option<Bead>, TrackerError> {
        let n = self.show_calls.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        if n >= self.close_after {
            self.inner.close(id, "closed by agent").await?;
        }
        self.inner.show(id).await
    }

    async fn list(&self, filter: Option<StatusFilter>) -> Result<Vec<Bead>, TrackerError> {
        self.inner.list(filter).await
    }

    async fn ready(&self, filter: ReadyFilter) -> Result<Vec<Bead>, TrackerError> {
        self.inner.ready(filter).await
    }

    async fn labels(&self, id: &BeadId) -> Result<Vec<String>, TrackerError> {
        self.inner.labels(id).await
    }

    async fn update_status(
        &self,
        id: &BeadId,
        status: BeadStatus,
        notes: &str,
    ) -> Result<(), TrackerError> {
        self.inner.update_status(id, status, notes).await
    }

    async fn comment(&self, id: &BeadId, message: &str) -> Result<(), TrackerError> {
        self.inner.comment(id, message).await
    }

    async fn close(&self, id: &BeadId, reason: &str) -> Result<(), TrackerError> {
        self.inner.close(id, reason).await
    }

    async fn close_eligible_epics(&self) -> Result<Vec<ClosedEpic>, TrackerError> {
        self.inner.close_eligible_epics().await
    }
}

#[tokio::test]
async fn new_controller_starts_idle_with_no_current_bead() {
    let controller = controller(
        FakeTrackerClient::new(),
        FakeSessionRunner::new(),
        FakeClock::default(),
        3,
    );
    let status = controller.handle().status();
    assert_eq!(status.state, "idle");
    assert_eq!(status.reported_state, "idle");
    assert!(status.current_bead.is_none());
    assert_eq!(status.current_turn, 0);
}

#[tokio::test]
async fn transition_emits_state_changed_event_only_on_real_change() {
    let controller = controller(
        FakeTrackerClient::new(),
        FakeSessionRunner::new(),
        FakeClock::default(),
        3,
    );
    let mut events = controller.handle().events();

    controller.transition(DrainState::Working);
    controller.transition(DrainState::Working); // no-op, already Working

    let event = events.recv().await.unwrap();
    assert!(matches!(event, Event::DrainStateChanged { ref from, ref to, .. } if from == "idle" && to == "working"));

    let nothing_more = tokio::time::timeout(Duration::from_millis(20), events.recv()).await;
    assert!(nothing_more.is_err(), "a no-op transition must not emit a second event");
}

#[tokio::test]
async fn validate_epic_errors_when_configured_epic_missing() {
    let mut config = ControllerConfig::default();
    config.epic = Some(BeadId::new("EPIC-404"));
    let controller = controller_with_tracker(
        FakeTrackerClient::new(),
        FakeSessionRunner::new(),
        FakeClock::default(),
        3,
        config,
    );

    let err = controller.validate_epic().await.unwrap_err();
    assert!(matches!(err, ControllerError::EpicNotFound(id) if id == "EPIC-404"));
}

#[tokio::test]
async fn validate_epic_errors_when_configured_epic_is_not_an_epic() {
    let tracker = FakeTrackerClient::new();
    tracker.insert(task("EPIC-1"));
    let mut config = ControllerConfig::default();
    config.epic = Some(BeadId::new("EPIC-1"));
    let controller = controller_with_tracker(tracker, FakeSessionRunner::new(), FakeClock::default(), 3, config);

    let err = controller.validate_epic().await.unwrap_err();
    assert!(matches!(err, ControllerError::EpicTypeMismatch(_)));
}

#[tokio::test]
async fn validate_epic_passes_for_a_real_epic() {
    let tracker = FakeTrackerClient::new();
    tracker.insert(bead("EPIC-1", IssueType::Epic, None));
    let mut config = ControllerConfig::default();
    config.epic = Some(BeadId::new("EPIC-1"));
    let controller = controller_with_tracker(tracker, FakeSessionRunner::new(), FakeClock::default(), 3, config);

    controller.validate_epic().await.unwrap();
}

#[tokio::test]
async fn run_exits_cleanly_when_stopped_before_any_work() {
    let controller = controller(
        FakeTrackerClient::new(),
        FakeSessionRunner::new(),
        FakeClock::default(),
        3,
    );
    let handle = controller.handle();
    let mut events = handle.events();
    handle.stop();

    controller.run("workdir").await.unwrap();

    assert_eq!(handle.status().state, "stopped");
    assert!(matches!(events.recv().await.unwrap(), Event::DrainStart { .. }));
    // idle -> stopping, then stopping -> stopped.
    assert!(matches!(events.recv().await.unwrap(), Event::DrainStateChanged { .. }));
    assert!(matches!(events.recv().await.unwrap(), Event::DrainStateChanged { .. }));
    assert!(matches!(events.recv().await.unwrap(), Event::DrainStop { .. }));
}

#[tokio::test]
async fn await_paused_signal_resumes_on_resume_signal() {
    let controller = controller(
        FakeTrackerClient::new(),
        FakeSessionRunner::new(),
        FakeClock::default(),
        3,
    );
    controller.transition(DrainState::Paused);
    let mut ts = test_signals();
    ts.resume_tx.send();

    controller.await_paused_signal(&mut ts.signals).await;

    assert_eq!(controller.handle().status().state, "idle");
}

#[tokio::test]
async fn await_paused_signal_moves_to_stopping_on_stop() {
    let controller = controller(
        FakeTrackerClient::new(),
        FakeSessionRunner::new(),
        FakeClock::default(),
        3,
    );
    controller.transition(DrainState::Paused);
    let mut ts = test_signals();
    ts.stop_tx.send();

    controller.await_paused_signal(&mut ts.signals).await;

    assert_eq!(controller.handle().status().state, "stopping");
}

#[tokio::test]
async fn stalled_retry_clears_history_and_resumes() {
    let tracker = FakeTrackerClient::new();
    tracker.insert(task("A"));
    let controller = controller(tracker, FakeSessionRunner::new(), FakeClock::default(), 1);

    controller.work_queue.record_failure(&BeadId::new("A"), "boom");
    *controller.stall.lock() = Some(StallContext {
        bead_id: Some(BeadId::new("A")),
        bead_title: Some("bead A".into()),
        reason: "all ready beads are at max failures".into(),
        stall_type: StallType::Abandoned,
        created_beads: vec![],
    });
    controller.transition(DrainState::Stalled);

    let mut ts = test_signals();
    ts.retry_tx.send();
    controller.await_stalled_signal(&mut ts.signals).await;

    assert_eq!(controller.handle().status().state, "idle");
    assert!(controller.work_queue.history().get(&BeadId::new("A")).is_none());
}

#[tokio::test]
async fn stalled_resume_on_abandoned_records_skipped_without_clearing_history() {
    let tracker = FakeTrackerClient::new();
    tracker.insert(task("A"));
    let controller = controller(tracker, FakeSessionRunner::new(), FakeClock::default(), 1);

    controller.work_queue.record_failure(&BeadId::new("A"), "boom");
    *controller.stall.lock() = Some(StallContext {
        bead_id: Some(BeadId::new("A")),
        bead_title: Some("bead A".into()),
        reason: "abandoned".into(),
        stall_type: StallType::Abandoned,
        created_beads: vec![],
    });
    controller.transition(DrainState::Stalled);

    let mut ts = test_signals();
    ts.resume_tx.send();
    controller.await_stalled_signal(&mut ts.signals).await;

    assert_eq!(controller.handle().status().state, "idle");
    let (state, _, _) = controller.work_queue.bead_state(&BeadId::new("A"));
    assert_eq!(state, BeadState::Skipped);
}

#[tokio::test]
async fn drive_idle_or_working_honors_pending_stop_signal_without_selecting() {
    let tracker = FakeTrackerClient::new();
    tracker.insert(task("A"));
    let controller = controller(tracker, FakeSessionRunner::new(), FakeClock::default(), 3);
    let mut ts = test_signals();
    ts.stop_tx.send();

    controller.drive_idle_or_working(&mut ts.signals).await;

    assert_eq!(controller.handle().status().state, "stopping");
    assert!(controller.work_queue.history().is_empty());
}

#[tokio::test]
async fn drive_idle_or_working_stops_on_pending_graceful_stop_signal() {
    let tracker = FakeTrackerClient::new();
    let controller = controller(tracker, FakeSessionRunner::new(), FakeClock::default(), 3);
    let mut ts = test_signals();
    ts.graceful_stop_tx.send();

    controller.drive_idle_or_working(&mut ts.signals).await;

    assert_eq!(controller.handle().status().state, "stopping");
}

#[tokio::test]
async fn handle_reset_history_and_reset_bead_reach_the_work_queue() {
    let tracker = FakeTrackerClient::new();
    let controller = controller(tracker, FakeSessionRunner::new(), FakeClock::default(), 3);
    let id = BeadId::new("A");
    controller.work_queue.record_failure(&id, "boom");
    assert_eq!(controller.work_queue.entry(&id).unwrap().attempts, 1);

    controller.handle().reset_bead(&id);
    let entry = controller.work_queue.entry(&id).unwrap();
    assert_eq!(entry.attempts, 0);
    assert_eq!(entry.status, drain_core::HistoryStatus::Pending);

    controller.handle().reset_history(&id);
    assert!(controller.work_queue.entry(&id).is_none());
}

#[tokio::test(start_paused = true)]
async fn successful_iteration_emits_start_and_end_and_records_completion() {
    let tracker = FakeTrackerClient::new();
    tracker.insert(task("A"));

    let runner = FakeSessionRunner::new();
    runner.push(ScriptedSession::success(2));

    let controller = controller(tracker.clone(), runner, FakeClock::default(), 3);
    let mut events = controller.handle().events();

    // Mirrors the agent closing the bead through the tracker CLI mid-session.
    tracker.close(&BeadId::new("A"), "agent closed it").await.unwrap();

    let mut ts = test_signals();
    controller.run_working_on_bead(task("A"), &mut ts.signals).await;

    assert!(matches!(events.recv().await.unwrap(), Event::IterationStart { .. }));
    assert!(matches!(events.recv().await.unwrap(), Event::SessionStart { .. }));
    assert!(matches!(events.recv().await.unwrap(), Event::IterationEnd { success: true, .. }));

    let history = controller.work_queue.history();
    let entry = history.get(&BeadId::new("A")).unwrap();
    assert_eq!(entry.status, drain_core::HistoryStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn mid_session_graceful_stop_lets_the_session_finish_before_stopping() {
    let tracker = FakeTrackerClient::new();
    tracker.insert(task("A"));

    let runner = FakeSessionRunner::new();
    runner.push(ScriptedSession::success(2));

    let controller = controller(tracker.clone(), runner, FakeClock::default(), 3);

    // Mirrors the agent closing the bead through the tracker CLI mid-session.
    tracker.close(&BeadId::new("A"), "agent closed it").await.unwrap();

    let mut ts = test_signals();
    ts.graceful_stop_tx.send();
    controller.run_working_on_bead(task("A"), &mut ts.signals).await;

    // The session ran to completion instead of being cut short: success was
    // recorded, not a pause.
    let history = controller.work_queue.history();
    let entry = history.get(&BeadId::new("A")).unwrap();
    assert_eq!(entry.status, drain_core::HistoryStatus::Completed);

    // The request is remembered for the caller to act on next, not dropped.
    assert!(controller.graceful_stop_requested.load(AtomicOrdering::SeqCst));
}

#[tokio::test]
async fn failed_iteration_records_failure_and_emits_unsuccessful_end() {
    let tracker = FakeTrackerClient::new();
    tracker.insert(task("A"));

    let runner = FakeSessionRunner::new();
    runner.push(ScriptedSession::agent_error(1, "agent gave up"));

    let controller = controller(tracker, runner, FakeClock::default(), 3);
    let mut events = controller.handle().events();
    let mut ts = test_signals();

    controller.run_working_on_bead(task("A"), &mut ts.signals).await;

    assert!(matches!(events.recv().await.unwrap(), Event::IterationStart { .. }));
    assert!(matches!(events.recv().await.unwrap(), Event::SessionStart { .. }));
    let end = events.recv().await.unwrap();
    match end {
        Event::IterationEnd { success: false, error: Some(msg), .. } => assert_eq!(msg, "agent gave up"),
        other => panic!("expected a failed iteration.end, got {other:?}"),
    }

    let history = controller.work_queue.history();
    let entry = history.get(&BeadId::new("A")).unwrap();
    assert_eq!(entry.status, drain_core::HistoryStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn follow_up_session_runs_when_main_session_does_not_close_the_bead() {
    let tracker = FakeTrackerClient::new();
    tracker.insert(task("A"));
    // First ground-truth check (after the main session) reports still-open;
    // the second (after the follow-up) reports closed.
    let wrapped = ShowCountingTracker::new(tracker, 2);

    let runner = FakeSessionRunner::new();
    runner.push(ScriptedSession::success(3)); // main session
    runner.push(ScriptedSession::success(1)); // follow-up session

    let controller = controller_with_tracker(
        wrapped,
        runner,
        FakeClock::default(),
        3,
        ControllerConfig::default(),
    );
    let mut events = controller.handle().events();
    let mut ts = test_signals();

    controller.run_working_on_bead(task("A"), &mut ts.signals).await;

    assert!(matches!(events.recv().await.unwrap(), Event::IterationStart { .. }));
    assert!(matches!(events.recv().await.unwrap(), Event::SessionStart { .. })); // main
    assert!(matches!(events.recv().await.unwrap(), Event::SessionStart { .. })); // follow-up
    assert!(matches!(events.recv().await.unwrap(), Event::IterationEnd { success: true, .. }));
}

#[tokio::test]
async fn follow_up_session_resets_status_when_bead_still_open() {
    let tracker = FakeTrackerClient::new();
    tracker.insert(task("A"));

    let runner = FakeSessionRunner::new();
    runner.push(ScriptedSession::success(3)); // main session, doesn't close
    runner.push(ScriptedSession::success(1)); // follow-up, also doesn't close

    let controller = controller(tracker.clone(), runner, FakeClock::default(), 3);
    let mut events = controller.handle().events();
    let mut ts = test_signals();

    controller.run_working_on_bead(task("A"), &mut ts.signals).await;

    assert!(matches!(events.recv().await.unwrap(), Event::IterationStart { .. }));
    assert!(matches!(events.recv().await.unwrap(), Event::SessionStart { .. })); // main
    assert!(matches!(events.recv().await.unwrap(), Event::SessionStart { .. })); // follow-up
    assert!(matches!(events.recv().await.unwrap(), Event::IterationEnd { success: false, .. }));

    assert!(tracker
        .comments_for(&BeadId::new("A"))
        .iter()
        .any(|c| c.contains("did not close")));
}

#[tokio::test]
async fn abandons_bead_after_max_failures_reached_through_drive_loop() {
    let tracker = FakeTrackerClient::new();
    tracker.insert(task("A"));

    let runner = FakeSessionRunner::new();
    runner.push(ScriptedSession::agent_error(1, "boom 1"));
    runner.push(ScriptedSession::agent_error(1, "boom 2"));

    let controller = controller(tracker, runner, FakeClock::default(), 2);
    let mut ts = test_signals();

    controller.drive_idle_or_working(&mut ts.signals).await;
    assert_eq!(controller.handle().status().state, "idle");

    controller.drive_idle_or_working(&mut ts.signals).await;
    assert_eq!(controller.handle().status().state, "idle");

    controller.drive_idle_or_working(&mut ts.signals).await;
    assert_eq!(controller.handle().status().state, "stalled");
    assert!(controller.handle().status().stall_reason.is_some());
}

#[tokio::test]
async fn emits_bead_abandoned_once_failure_count_reaches_the_limit() {
    let tracker = FakeTrackerClient::new();
    tracker.insert(task("A"));

    let runner = FakeSessionRunner::new();
    runner.push(ScriptedSession::agent_error(1, "boom 1"));
    runner.push(ScriptedSession::agent_error(1, "boom 2"));

    let controller = controller(tracker, runner, FakeClock::default(), 2);
    let mut events = controller.handle().events();
    let mut ts = test_signals();

    controller.drive_idle_or_working(&mut ts.signals).await;
    assert!(matches!(events.recv().await.unwrap(), Event::IterationStart { .. }));
    assert!(matches!(events.recv().await.unwrap(), Event::SessionStart { .. }));
    assert!(matches!(events.recv().await.unwrap(), Event::IterationEnd { success: false, .. }));

    controller.drive_idle_or_working(&mut ts.signals).await;
    assert!(matches!(events.recv().await.unwrap(), Event::IterationStart { .. }));
    assert!(matches!(events.recv().await.unwrap(), Event::SessionStart { .. }));
    assert!(matches!(events.recv().await.unwrap(), Event::IterationEnd { success: false, .. }));

    let abandoned = events.recv().await.unwrap();
    match abandoned {
        Event::BeadAbandoned {
            bead_id,
            attempts,
            max_failures,
            last_error,
            ..
        } => {
            assert_eq!(bead_id, BeadId::new("A"));
            assert_eq!(attempts, 2);
            assert_eq!(max_failures, 2);
            assert_eq!(last_error.as_deref(), Some("boom 2"));
        }
        other => panic!("expected BeadAbandoned, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn bead_creation_during_success_triggers_review_stall() {
    let tracker = FakeTrackerClient::new();
    tracker.insert(task("A"));

    let runner = FakeSessionRunner::new();
    runner.push(ScriptedSession::success(1));

    let mut config = ControllerConfig::default();
    config.review_debounce = Duration::from_millis(50);
    let controller = controller_with_tracker(tracker.clone(), runner, FakeClock::default(), 3, config);

    tracker.close(&BeadId::new("A"), "agent closed it").await.unwrap();

    // Fires once run_working_on_bead has subscribed to the bus (which
    // happens synchronously before its first await), so it lands inside the
    // review-debounce window rather than being missed entirely.
    let bus = controller.event_bus.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.emit(Event::BeadChanged {
            timestamp: DateTime::UNIX_EPOCH,
            bead_id: BeadId::new("NEW-1"),
            old_state: None,
            new_state: Some(drain_core::BeadChangedState {
                status: "open".into(),
                created_by: "atari-drain".into(),
            }),
        });
    });

    let mut ts = test_signals();
    controller.run_working_on_bead(task("A"), &mut ts.signals).await;

    assert_eq!(controller.handle().status().state, "stalled");
    let status = controller.handle().status();
    assert!(status.stall_reason.unwrap().contains("1 new bead"));
}
