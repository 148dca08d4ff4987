use super::*;
use drain_adapters::{FakeSessionRunner, FakeTrackerClient};
use drain_core::{BackoffSchedule, FakeClock};
use drain_engine::{Controller, ControllerConfig, EventBus, WorkQueue, WorkQueueConfig};
use std::sync::Arc;

fn drain_handle() -> DrainHandle {
    let clock = FakeClock::default();
    let queue = WorkQueue::new(WorkQueueConfig::default(), BackoffSchedule::default(), 3, clock.clone());
    let controller = Controller::new(
        Arc::new(FakeTrackerClient::new()),
        Arc::new(FakeSessionRunner::new()),
        clock,
        queue,
        EventBus::new(),
        ControllerConfig::default(),
    );
    DrainHandle::new(controller.handle())
}

#[test]
fn status_reports_idle_before_run_is_called() {
    let handle = drain_handle();
    let status = handle.status();
    assert_eq!(status.state, "idle");
    assert!(status.current_bead.is_none());
}

#[test]
fn pause_and_resume_are_fire_and_forget_signals() {
    let handle = drain_handle();
    handle.pause();
    handle.graceful_pause();
    handle.resume();
    handle.stop();
    handle.graceful_stop();
    handle.retry();
}

#[test]
fn reset_bead_and_reset_history_reach_the_underlying_work_queue() {
    let handle = drain_handle();
    let id = BeadId::new("A");
    handle.reset_bead(&id);
    handle.reset_history(&id);
}

#[test]
fn events_returns_a_subscriber_receiver() {
    let handle = drain_handle();
    let _events = handle.events();
}
