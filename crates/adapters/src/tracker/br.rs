// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI-subprocess-backed [`TrackerClient`] wrapping the `br` binary.

use super::{ClosedEpic, ReadyFilter, StatusFilter, TrackerClient, TrackerError};
use async_trait::async_trait;
use drain_core::{Bead, BeadId, BeadStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for the cheaper `show` call.
pub const SHOW_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw result of invoking the tracker command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    fn ensure_success(&self) -> Result<(), TrackerError> {
        if self.status == 0 {
            Ok(())
        } else {
            Err(TrackerError::NonZeroExit {
                status: self.status,
                stderr: self.stderr.clone(),
            })
        }
    }
}

/// Abstracts subprocess invocation so the tracker client's argv-building and
/// JSON-parsing logic can be tested without a real `br` binary on PATH.
#[async_trait]
pub trait CommandRunner: Send + Sync + 'static {
    async fn run(&self, args: &[String], timeout: Duration) -> Result<CommandOutput, TrackerError>;
}

/// Production runner: spawns the configured binary as a child process.
pub struct RealCommandRunner {
    binary: PathBuf,
}

impl RealCommandRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for RealCommandRunner {
    async fn run(&self, args: &[String], timeout: Duration) -> Result<CommandOutput, TrackerError> {
        let mut command = tokio::process::Command::new(&self.binary);
        command.args(args);
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());

        let spawn = command
            .spawn()
            .map_err(|e| TrackerError::Spawn(e.to_string()))?;

        let output = tokio::time::timeout(timeout, spawn.wait_with_output())
            .await
            .map_err(|_| TrackerError::Timeout(timeout))?
            .map_err(|e| TrackerError::Spawn(e.to_string()))?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Typed facade over `br`. Holds no state beyond the runner: every call
/// formats argv fresh and invokes the runner.
#[derive(Clone)]
pub struct BrTrackerClient {
    runner: Arc<dyn CommandRunner>,
    default_timeout: Duration,
    show_timeout: Duration,
}

impl BrTrackerClient {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            default_timeout: DEFAULT_TIMEOUT,
            show_timeout: SHOW_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, default_timeout: Duration, show_timeout: Duration) -> Self {
        self.default_timeout = default_timeout;
        self.show_timeout = show_timeout;
        self
    }

    async fn run_json(&self, args: Vec<String>, timeout: Duration) -> Result<serde_json::Value, TrackerError> {
        let output = self.runner.run(&args, timeout).await?;
        output.ensure_success()?;
        if output.stdout.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    async fn run_void(&self, args: Vec<String>, timeout: Duration) -> Result<(), TrackerError> {
        let output = self.runner.run(&args, timeout).await?;
        output.ensure_success()
    }

    /// `list` output sometimes omits `parent`; top up any bead with no parent
    /// via an individual `show` call. Deliberate N+1: genuinely parentless
    /// beads just pay one harmless extra round trip.
    async fn top_up_parents(&self, mut beads: Vec<Bead>) -> Result<Vec<Bead>, TrackerError> {
        for bead in &mut beads {
            if bead.parent.is_none() {
                if let Some(full) = self.show(&bead.id).await? {
                    bead.parent = full.parent;
                }
            }
        }
        Ok(beads)
    }
}

#[async_trait]
impl TrackerClient for BrTrackerClient {
    async fn show(&self, id: &BeadId) -> Result<Option<Bead>, TrackerError> {
        let args = vec!["show".into(), "--json".into(), id.as_str().into()];
        let value = self.run_json(args, self.show_timeout).await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    async fn list(&self, filter: Option<StatusFilter>) -> Result<Vec<Bead>, TrackerError> {
        let mut args = vec!["list".into(), "--json".into()];
        if let Some(filter) = filter {
            if let Some(status) = filter.status {
                args.push("--status".into());
                args.push(status);
            }
        }
        let value = self.run_json(args, self.default_timeout).await?;
        let beads: Vec<Bead> = if value.is_null() {
            Vec::new()
        } else {
            serde_json::from_value(value)?
        };
        self.top_up_parents(beads).await
    }

    async fn ready(&self, filter: ReadyFilter) -> Result<Vec<Bead>, TrackerError> {
        let mut args = vec!["ready".into(), "--json".into()];
        if let Some(label) = filter.label {
            args.push("--label".into());
            args.push(label);
        }
        if filter.unassigned_only {
            args.push("--unassigned-only".into());
        }
        let value = self.run_json(args, self.default_timeout).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn labels(&self, id: &BeadId) -> Result<Vec<String>, TrackerError> {
        let args = vec!["labels".into(), "--json".into(), id.as_str().into()];
        let value = self.run_json(args, self.default_timeout).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn update_status(
        &self,
        id: &BeadId,
        status: BeadStatus,
        notes: &str,
    ) -> Result<(), TrackerError> {
        let args = vec![
            "update".into(),
            id.as_str().into(),
            "--status".into(),
            status.to_string(),
            "--notes".into(),
            notes.into(),
        ];
        self.run_void(args, self.default_timeout).await
    }

    async fn comment(&self, id: &BeadId, message: &str) -> Result<(), TrackerError> {
        let args = vec!["comment".into(), id.as_str().into(), message.into()];
        self.run_void(args, self.default_timeout).await
    }

    async fn close(&self, id: &BeadId, reason: &str) -> Result<(), TrackerError> {
        let args = vec![
            "close".into(),
            id.as_str().into(),
            "--reason".into(),
            reason.into(),
        ];
        self.run_void(args, self.default_timeout).await
    }

    async fn close_eligible_epics(&self) -> Result<Vec<ClosedEpic>, TrackerError> {
        let args = vec!["epic".into(), "close-eligible".into(), "--json".into()];
        let value = self.run_json(args, self.default_timeout).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(value)?)
    }
}
