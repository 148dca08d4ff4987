// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted [`SessionRunner`] for engine tests (feature `test-support`).

use super::{SessionError, SessionHandle, SessionOutcome, SessionRunner, SpawnConfig, TurnBoundaryFn};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// One canned session attempt: how many turns to announce before settling
/// on a terminal outcome.
#[derive(Debug, Clone)]
pub struct ScriptedSession {
    pub turns: u32,
    pub outcome: ScriptedOutcome,
}

#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Ok(SessionOutcome),
    Err(String),
}

impl ScriptedSession {
    pub fn success(turns: u32) -> Self {
        Self {
            turns,
            outcome: ScriptedOutcome::Ok(SessionOutcome {
                num_turns: turns,
                total_cost_usd: 0.01,
                session_id: Some("fake-session".into()),
                graceful_pause: false,
                error: None,
                invalid_lines: 0,
            }),
        }
    }

    pub fn agent_error(turns: u32, message: impl Into<String>) -> Self {
        Self {
            turns,
            outcome: ScriptedOutcome::Ok(SessionOutcome {
                num_turns: turns,
                error: Some(message.into()),
                ..Default::default()
            }),
        }
    }

    pub fn spawn_failure(message: impl Into<String>) -> Self {
        Self {
            turns: 0,
            outcome: ScriptedOutcome::Err(message.into()),
        }
    }
}

/// A [`SessionRunner`] driven from a queue of [`ScriptedSession`]s rather
/// than a real subprocess. Falls back to a trivial one-turn success once
/// the queue is drained, so unscripted tests don't hang.
#[derive(Clone, Default)]
pub struct FakeSessionRunner {
    scripts: Arc<Mutex<VecDeque<ScriptedSession>>>,
    calls: Arc<Mutex<Vec<SpawnConfig>>>,
}

impl FakeSessionRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, script: ScriptedSession) {
        self.scripts.lock().push_back(script);
    }

    pub fn calls(&self) -> Vec<SpawnConfig> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SessionRunner for FakeSessionRunner {
    async fn start(
        &self,
        config: SpawnConfig,
        on_turn: TurnBoundaryFn,
    ) -> Result<SessionHandle, SessionError> {
        self.calls.lock().push(config);

        let ScriptedSession { turns, outcome } = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| ScriptedSession::success(1));

        let mut outcome = match outcome {
            ScriptedOutcome::Ok(outcome) => outcome,
            ScriptedOutcome::Err(message) => return Err(SessionError::SpawnFailed(message)),
        };

        let pause_requested = Arc::new(AtomicBool::new(false));
        let turn_count = Arc::new(AtomicU32::new(0));
        let (kill_tx, kill_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let stderr_buf = Arc::new(Mutex::new(String::new()));

        let task_pause = Arc::clone(&pause_requested);
        let task_turns = Arc::clone(&turn_count);
        tokio::spawn(async move {
            let mut kill_rx = kill_rx;
            let mut paused_early = false;
            for turn in 1..=turns {
                if kill_rx.try_recv().is_ok() {
                    paused_early = true;
                    break;
                }
                task_turns.store(turn, Ordering::SeqCst);
                on_turn(turn);
                if task_pause.load(Ordering::SeqCst) {
                    paused_early = true;
                    break;
                }
            }
            if paused_early {
                outcome.graceful_pause = true;
                outcome.num_turns = task_turns.load(Ordering::SeqCst);
            }
            let _ = outcome_tx.send(Ok(outcome));
        });

        Ok(SessionHandle::new(
            pause_requested,
            turn_count,
            kill_tx,
            outcome_rx,
            stderr_buf,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SpawnConfig {
        SpawnConfig {
            command: "claude".into(),
            prompt: "do the thing".into(),
            resume_session_id: None,
            cwd: std::env::temp_dir(),
            env: vec![],
            max_turns: None,
        }
    }

    #[tokio::test]
    async fn scripted_success_reports_turns_and_cost() {
        let runner = FakeSessionRunner::new();
        runner.push(ScriptedSession::success(3));
        let mut handle = runner.start(config(), Arc::new(|_| {})).await.unwrap();
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.num_turns, 3);
        assert!(!outcome.graceful_pause);
    }

    #[tokio::test]
    async fn scripted_spawn_failure_is_surfaced() {
        let runner = FakeSessionRunner::new();
        runner.push(ScriptedSession::spawn_failure("boom"));
        let result = runner.start(config(), Arc::new(|_| {})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn pause_requested_mid_session_stops_early() {
        let runner = FakeSessionRunner::new();
        runner.push(ScriptedSession::success(5));
        let mut handle = runner.start(config(), Arc::new(|_| {})).await.unwrap();
        handle.request_pause();
        let outcome = handle.wait().await.unwrap();
        assert!(outcome.graceful_pause);
        assert!(outcome.num_turns < 5);
    }

    #[tokio::test]
    async fn unscripted_call_falls_back_to_one_turn_success() {
        let runner = FakeSessionRunner::new();
        let mut handle = runner.start(config(), Arc::new(|_| {})).await.unwrap();
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.num_turns, 1);
    }
}
