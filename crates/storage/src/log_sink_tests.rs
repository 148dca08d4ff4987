use super::*;
use chrono::DateTime;
use drain_core::{BeadId, Event};
use drain_engine::EventBus;

fn sample_event(id: &str) -> Event {
    Event::SessionStart {
        timestamp: DateTime::UNIX_EPOCH,
        bead_id: BeadId::new(id),
        title: "fix thing".into(),
    }
}

#[tokio::test]
async fn writes_events_as_json_lines_and_stops_when_the_bus_closes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");

    let bus = EventBus::new();
    let events = bus.subscribe();
    let handle = LogSink::new(&path).start(events);

    bus.emit(sample_event("A"));
    bus.emit(sample_event("B"));
    bus.close();
    handle.wait().await;

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["bead_id"], "A");
    let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second["bead_id"], "B");
}

#[tokio::test]
async fn creates_parent_directories_and_appends_across_starts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("events.jsonl");

    let bus = EventBus::new();
    let events = bus.subscribe();
    let handle = LogSink::new(&path).start(events);
    bus.emit(sample_event("A"));
    bus.close();
    handle.wait().await;

    let bus = EventBus::new();
    let events = bus.subscribe();
    let handle = LogSink::new(&path).start(events);
    bus.emit(sample_event("B"));
    bus.close();
    handle.wait().await;

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 2);
}

#[tokio::test]
async fn shutdown_stops_the_loop_early() {
    let bus = EventBus::new();
    let events = bus.subscribe();
    let handle = LogSink::new("/nonexistent/should-not-be-reached.jsonl").start(events);
    handle.shutdown().await;
    assert_eq!(bus.subscriber_count(), 0);
}
