// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only JSON-lines event log.
//!
//! One subscriber per bus, owning its own writer. Every event is written
//! as one line and flushed immediately; a slow disk never blocks the bus
//! (see `drain_engine::event_bus`'s drop-newest policy) and a failing
//! writer never reaches the controller — open/write/flush errors are
//! logged and the sink just tries again on the next event.

use drain_engine::EventReceiver;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Writes every event it receives to a JSON-lines file, append-mode.
pub struct LogSink {
    path: PathBuf,
    file: Option<File>,
}

impl LogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    /// Spawns the sink's run loop and returns a handle to stop it.
    pub fn start(mut self, mut events: EventReceiver) -> LogSinkHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    received = events.recv() => {
                        match received {
                            Some(event) => self.write_event(&event),
                            None => break,
                        }
                    }
                }
            }
        });
        LogSinkHandle {
            join,
            shutdown: shutdown_tx,
        }
    }

    fn writer(&mut self) -> Option<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!(path = %parent.display(), error = %e, "failed to create event log directory");
                    return None;
                }
            }
            match OpenOptions::new().create(true).append(true).open(&self.path) {
                Ok(f) => self.file = Some(f),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to open event log");
                    return None;
                }
            }
        }
        self.file.as_mut()
    }

    fn write_event(&mut self, event: &drain_core::Event) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, kind = event.kind(), "failed to serialize event for the log sink");
                return;
            }
        };
        let path_for_log = self.path.clone();
        let Some(file) = self.writer() else {
            return;
        };
        if let Err(e) = writeln!(file, "{line}") {
            tracing::warn!(path = %path_for_log.display(), error = %e, "failed to write event log line");
            return;
        }
        if let Err(e) = file.flush() {
            tracing::warn!(path = %path_for_log.display(), error = %e, "failed to flush event log");
        }
    }
}

/// Handle to a running [`LogSink`]. Dropping it leaves the sink running;
/// call [`shutdown`](Self::shutdown) to stop it and wait for the last
/// write to land.
pub struct LogSinkHandle {
    join: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl LogSinkHandle {
    /// Requests an early stop (the "ctx cancelled" half of the contract)
    /// and waits for the run loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.join.await;
    }

    /// Waits for the run loop to exit on its own, e.g. because the event
    /// bus was closed (the "channel closes" half of the contract).
    pub async fn wait(self) {
        let _ = self.join.await;
    }
}

#[cfg(test)]
#[path = "log_sink_tests.rs"]
mod tests;
