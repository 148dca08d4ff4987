// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-producer, multi-consumer event fan-out.
//!
//! `emit` never blocks on a slow subscriber: a full subscriber buffer drops
//! the newest event for that subscriber only, and increments its drop
//! counter. Other subscribers are unaffected.

use drain_core::Event;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default per-subscriber buffer size.
pub const DEFAULT_BUFFER: usize = 256;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

/// The bus. Cheap to clone; all clones share the same subscriber registry.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe with the default buffer size.
    pub fn subscribe(&self) -> EventReceiver {
        self.subscribe_buffered(DEFAULT_BUFFER)
    }

    pub fn subscribe_buffered(&self, buffer: usize) -> EventReceiver {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().push(Subscriber {
            id,
            tx,
            dropped: Arc::clone(&dropped),
        });
        EventReceiver {
            id,
            rx,
            dropped,
            bus: self.clone(),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }

    /// Deliver `event` to every current subscriber. Never blocks: a full
    /// channel drops the event for that subscriber and counts it.
    pub fn emit(&self, event: Event) {
        let subscribers = self.subscribers.lock();
        for sub in subscribers.iter() {
            if sub.tx.try_send(event.clone()).is_err() {
                sub.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(subscriber = sub.id, kind = event.kind(), "dropped event, subscriber buffer full");
            }
        }
    }

    /// Closes every subscriber channel. Further `emit` calls are no-ops
    /// once the registry is cleared.
    pub fn close(&self) {
        self.subscribers.lock().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// A subscriber's receiving end. Owned by exactly one consumer task.
pub struct EventReceiver {
    id: u64,
    rx: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
    bus: EventBus,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}
