// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable state snapshot.
//!
//! Maintains an in-memory [`StateSnapshot`] driven purely by the events it
//! subscribes to, persisting it atomically (write temp, fsync, rename)
//! after every relevant transition. Readers tolerate unknown fields and
//! refuse to load a newer major schema version than they understand.

use chrono::Utc;
use drain_core::{Event, HistoryStatus, StateSnapshot, STATE_SCHEMA_VERSION};
use drain_engine::EventReceiver;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum StateSinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("state file schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// Atomically saves `snapshot` to `path` (write to `.tmp`, fsync, rename).
fn save(snapshot: &StateSnapshot, path: &Path) -> Result<(), StateSinkError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, snapshot)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Loads `path` if it exists. A corrupt file is moved aside to `.bak` and
/// treated as absent; a too-new schema major version is a hard error.
fn load(path: &Path) -> Result<Option<StateSnapshot>, StateSinkError> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let snapshot: StateSnapshot = match serde_json::from_reader(reader) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            let bak_path = rotate_bak_path(path);
            tracing::warn!(
                error = %e,
                path = %path.display(),
                bak = %bak_path.display(),
                "corrupt state file, moving to .bak and starting fresh",
            );
            fs::rename(path, &bak_path)?;
            return Ok(None);
        }
    };
    if snapshot.version > STATE_SCHEMA_VERSION {
        return Err(StateSinkError::UnsupportedVersion {
            found: snapshot.version,
            supported: STATE_SCHEMA_VERSION,
        });
    }
    Ok(Some(snapshot))
}

const MAX_BAK_FILES: u32 = 3;

/// Picks the next `.bak` / `.bak.N` path, rotating older backups out.
/// Keeps up to [`MAX_BAK_FILES`] backups; the oldest is removed once the
/// limit is reached.
fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }
    bak(1)
}

/// A subscriber that keeps [`StateSnapshot`] up to date and persists it
/// on every relevant event.
pub struct StateSink {
    path: PathBuf,
    state: Arc<Mutex<StateSnapshot>>,
}

impl StateSink {
    /// Loads `path` if it exists (falling back to an empty snapshot),
    /// ready to be driven by [`StateSink::start`].
    pub fn load_or_empty(path: impl Into<PathBuf>) -> Result<Self, StateSinkError> {
        let path = path.into();
        let state = load(&path)?.unwrap_or_else(|| StateSnapshot::empty(Utc::now()));
        Ok(Self {
            path,
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// The current snapshot, for restoring runtime state or serving
    /// `status` queries.
    pub fn snapshot(&self) -> StateSnapshot {
        self.state.lock().clone()
    }

    pub fn start(self, mut events: EventReceiver) -> StateSinkHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    received = events.recv() => {
                        match received {
                            Some(event) => self.apply(&event),
                            None => break,
                        }
                    }
                }
            }
        });
        StateSinkHandle {
            join,
            shutdown: shutdown_tx,
        }
    }

    fn apply(&self, event: &Event) {
        let changed = {
            let mut state = self.state.lock();
            let changed = apply_to_snapshot(&mut state, event);
            if changed {
                state.updated_at = event.timestamp();
            }
            changed
        };
        if changed {
            let snapshot = self.snapshot();
            if let Err(e) = save(&snapshot, &self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to persist state snapshot");
            }
        }
    }
}

/// Applies one event to `state`'s in-memory fields. Returns whether
/// anything changed (an unrelated event is a no-op, not a write).
fn apply_to_snapshot(state: &mut StateSnapshot, event: &Event) -> bool {
    match event {
        Event::IterationStart {
            bead_id,
            attempt,
            top_level_id,
            top_level_title,
            timestamp,
            ..
        } => {
            let entry = state.history.entry(bead_id.clone()).or_default();
            entry.status = HistoryStatus::Working;
            entry.attempts = *attempt;
            entry.last_attempt = Some(*timestamp);
            state.active_top_level = top_level_id.clone();
            state.active_top_level_title = top_level_title.clone();
            true
        }
        Event::IterationEnd {
            bead_id, success, error, ..
        } => {
            let entry = state.history.entry(bead_id.clone()).or_default();
            if *success {
                entry.status = HistoryStatus::Completed;
                entry.last_error = None;
            } else {
                // `bead.abandoned` (if this was the attempt that tipped the
                // bead over) already landed `Abandoned` on this same entry
                // moments earlier; don't downgrade it back to `Failed`.
                if entry.status != HistoryStatus::Abandoned {
                    entry.status = HistoryStatus::Failed;
                }
                entry.last_error.clone_from(error);
            }
            true
        }
        Event::BeadAbandoned {
            bead_id,
            attempts,
            last_error,
            ..
        } => {
            let entry = state.history.entry(bead_id.clone()).or_default();
            entry.status = HistoryStatus::Abandoned;
            entry.attempts = *attempts;
            entry.last_error.clone_from(last_error);
            true
        }
        Event::Stall {
            bead_id,
            title,
            reason,
            stall_type,
            timestamp,
            ..
        } => {
            state.stalled_bead_id.clone_from(bead_id);
            state.stalled_bead_title.clone_from(title);
            state.stall_reason = Some(reason.clone());
            state.stalled_at = Some(*timestamp);
            state.stall_type = Some(*stall_type);
            true
        }
        Event::StallCleared { .. } => {
            state.stalled_bead_id = None;
            state.stalled_bead_title = None;
            state.stall_reason = None;
            state.stalled_at = None;
            state.stall_type = None;
            true
        }
        _ => false,
    }
}

/// Handle to a running [`StateSink`].
pub struct StateSinkHandle {
    join: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl StateSinkHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.join.await;
    }

    pub async fn wait(self) {
        let _ = self.join.await;
    }
}

#[cfg(test)]
#[path = "state_sink_tests.rs"]
mod tests;
