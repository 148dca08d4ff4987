// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess-backed [`SessionRunner`] for the `claude` agent binary.

use super::parser::{ParseOutcome, SessionLogParser};
use super::{SessionError, SessionHandle, SessionOutcome, SessionRunner, SpawnConfig, TurnBoundaryFn};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;

/// Spawns `claude` (or any compatible binary) and streams its line-delimited
/// JSON stdout through [`SessionLogParser`].
#[derive(Clone, Default)]
pub struct ClaudeSessionRunner;

impl ClaudeSessionRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionRunner for ClaudeSessionRunner {
    async fn start(
        &self,
        config: SpawnConfig,
        on_turn: TurnBoundaryFn,
    ) -> Result<SessionHandle, SessionError> {
        let mut parts = config.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| SessionError::SpawnFailed("empty agent command".into()))?;

        let mut command = tokio::process::Command::new(program);
        command.args(parts);
        if let Some(resume_id) = &config.resume_session_id {
            command.arg("--resume").arg(resume_id);
        }
        if let Some(max_turns) = config.max_turns {
            command.arg("--max-turns").arg(max_turns.to_string());
        }
        command.current_dir(&config.cwd);
        command.envs(config.env.iter().cloned());
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::SpawnFailed("no stdin handle".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::SpawnFailed("no stdout handle".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SessionError::SpawnFailed("no stderr handle".into()))?;

        let prompt = config.prompt.clone();
        tokio::spawn(async move {
            let mut stdin = stdin;
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                tracing::warn!(error = %e, "failed writing prompt to agent stdin");
            }
        });

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        {
            let stderr_buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut buf = stderr_buf.lock();
                    buf.push_str(&line);
                    buf.push('\n');
                }
            });
        }

        let pause_requested = Arc::new(AtomicBool::new(false));
        let turn_count = Arc::new(AtomicU32::new(0));
        let (kill_tx, kill_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        {
            let pause_requested = Arc::clone(&pause_requested);
            let turn_count = Arc::clone(&turn_count);
            tokio::spawn(async move {
                let outcome = drive_session(child, stdout, kill_rx, &pause_requested, &turn_count, on_turn).await;
                let _ = outcome_tx.send(outcome);
            });
        }

        Ok(SessionHandle::new(
            pause_requested,
            turn_count,
            kill_tx,
            outcome_rx,
            stderr_buf,
        ))
    }
}

/// Drains the agent's stdout until the stream closes or a kill is
/// requested, never returning early on a malformed line.
async fn drive_session(
    mut child: tokio::process::Child,
    stdout: tokio::process::ChildStdout,
    mut kill_rx: oneshot::Receiver<()>,
    pause_requested: &AtomicBool,
    turn_count: &AtomicU32,
    on_turn: TurnBoundaryFn,
) -> Result<SessionOutcome, SessionError> {
    let mut parser = SessionLogParser::new();
    let mut lines = BufReader::new(stdout).lines();

    loop {
        tokio::select! {
            biased;
            _ = &mut kill_rx => {
                let _ = child.start_kill();
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if parser.feed(&line) == ParseOutcome::TurnBoundary {
                            turn_count.store(parser.turns, Ordering::SeqCst);
                            on_turn(parser.turns);
                            if pause_requested.load(Ordering::SeqCst) {
                                let _ = child.start_kill();
                                parser.outcome.graceful_pause = true;
                                break;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "error reading agent stdout, stopping parse loop");
                        break;
                    }
                }
            }
        }
    }

    let mut outcome = parser.outcome;
    match child.wait().await {
        Ok(status) if !status.success() && outcome.error.is_none() && !outcome.graceful_pause => {
            outcome.error = Some(format!("agent exited with status {status}"));
        }
        Ok(_) => {}
        Err(e) => return Err(SessionError::ProcessError(e.to_string())),
    }

    Ok(outcome)
}
