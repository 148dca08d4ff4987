// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed facade over the external issue-tracker CLI.

mod br;
#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use br::{BrTrackerClient, CommandOutput, CommandRunner, RealCommandRunner};

use async_trait::async_trait;
use drain_core::{Bead, BeadId, BeadStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a tracker call can surface. All are treated as transient/retryable
/// by the caller; this crate itself does not retry.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("failed to spawn tracker command: {0}")]
    Spawn(String),
    #[error("tracker command timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("tracker command exited with status {status}: {stderr}")]
    NonZeroExit { status: i32, stderr: String },
    #[error("failed to parse tracker output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Optional filter for `list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusFilter {
    pub status: Option<String>,
}

/// Optional filter for `ready`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadyFilter {
    pub label: Option<String>,
    pub unassigned_only: bool,
}

/// One row of `close_eligible_epics()`'s result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedEpic {
    pub id: BeadId,
    pub title: String,
    pub dependent_count: u32,
}

/// A typed facade over the tracker CLI. Implementations are pure: they
/// format argv, invoke a configured command-runner, and parse JSON. They
/// Must not cache — every call is a fresh query.
#[async_trait]
pub trait TrackerClient: Send + Sync + 'static {
    async fn show(&self, id: &BeadId) -> Result<Option<Bead>, TrackerError>;
    async fn list(&self, filter: Option<StatusFilter>) -> Result<Vec<Bead>, TrackerError>;
    async fn ready(&self, filter: ReadyFilter) -> Result<Vec<Bead>, TrackerError>;
    async fn labels(&self, id: &BeadId) -> Result<Vec<String>, TrackerError>;
    async fn update_status(
        &self,
        id: &BeadId,
        status: BeadStatus,
        notes: &str,
    ) -> Result<(), TrackerError>;
    async fn comment(&self, id: &BeadId, message: &str) -> Result<(), TrackerError>;
    async fn close(&self, id: &BeadId, reason: &str) -> Result<(), TrackerError>;
    async fn close_eligible_epics(&self) -> Result<Vec<ClosedEpic>, TrackerError>;
}
