// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Session Runner: spawns the external agent and streams its
//! line-delimited JSON output.

mod claude;
pub mod envelope;
pub mod parser;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use claude::ClaudeSessionRunner;
pub use envelope::AgentEnvelope;
pub use parser::{ParseOutcome, SessionLogParser};

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors the session runner can surface.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn agent: {0}")]
    SpawnFailed(String),
    #[error("agent process error: {0}")]
    ProcessError(String),
}

/// Configuration for one session attempt.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub command: String,
    pub prompt: String,
    pub resume_session_id: Option<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    /// Caps the session at N turns via `--max-turns`; `None` means
    /// unbounded (a follow-up session gets a shorter turn limit than the first).
    pub max_turns: Option<u32>,
}

/// Callback invoked at each turn boundary with the running turn count
/// at each turn boundary invokes an optional callback.
pub type TurnBoundaryFn = Arc<dyn Fn(u32) + Send + Sync>;

/// Terminal outcome of a session, as recorded from the `result` envelope
/// or, on a pause/crash, from whatever was observed before it exited.
#[derive(Debug, Clone, Default)]
pub struct SessionOutcome {
    pub num_turns: u32,
    pub total_cost_usd: f64,
    pub session_id: Option<String>,
    pub graceful_pause: bool,
    /// Set when the `result` envelope carried `subtype = "error_tool_use"`,
    /// or the process exited non-zero without a terminal envelope.
    pub error: Option<String>,
    pub invalid_lines: u32,
}

/// Spawns the agent subprocess and streams its output.
///
/// Implementations are pure collaborators injected at construction; the
/// controller drives exactly one at a time per bead attempt.
#[async_trait]
pub trait SessionRunner: Send + Sync + 'static {
    /// Spawn the agent. Returns an error iff spawning itself fails; stream
    /// parse errors and process-level failures surface through
    /// [`SessionHandle::wait`] instead.
    async fn start(
        &self,
        config: SpawnConfig,
        on_turn: TurnBoundaryFn,
    ) -> Result<SessionHandle, SessionError>;
}

/// A running (or just-finished) session. Shared state is cheap to clone;
/// `wait` consumes the handle.
pub struct SessionHandle {
    pause_requested: Arc<AtomicBool>,
    turn_count: Arc<AtomicU32>,
    kill_tx: Option<oneshot::Sender<()>>,
    outcome_rx: oneshot::Receiver<Result<SessionOutcome, SessionError>>,
    stderr: Arc<parking_lot::Mutex<String>>,
}

impl SessionHandle {
    pub(crate) fn new(
        pause_requested: Arc<AtomicBool>,
        turn_count: Arc<AtomicU32>,
        kill_tx: oneshot::Sender<()>,
        outcome_rx: oneshot::Receiver<Result<SessionOutcome, SessionError>>,
        stderr: Arc<parking_lot::Mutex<String>>,
    ) -> Self {
        Self {
            pause_requested,
            turn_count,
            kill_tx: Some(kill_tx),
            outcome_rx,
            stderr,
        }
    }

    /// Cooperative flag checked at turn boundaries.
    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    pub fn pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count.load(Ordering::SeqCst)
    }

    /// Idempotent: a second call after the kill channel is already consumed
    /// is a no-op: sending SIGKILL to an already-dead process is idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Captured stderr so far, for error reporting.
    pub fn stderr(&self) -> String {
        self.stderr.lock().clone()
    }

    /// Blocks until the subprocess exits and the parser drains its stream.
    /// Takes `&mut self` (not by value) so a caller can race it against
    /// signal channels in the same `select!` while still holding `stop`/
    /// `request_pause` available on other branches.
    pub async fn wait(&mut self) -> Result<SessionOutcome, SessionError> {
        match (&mut self.outcome_rx).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::ProcessError(
                "session task ended without reporting an outcome".into(),
            )),
        }
    }
}
