// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-bead history entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// History kept for one bead across attempts. Created lazily on first
/// selection; never deleted except by explicit `reset_history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub status: HistoryStatus,
    /// Monotonic except immediately after `reset_history`/`reset_bead`.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_session_id: Option<String>,
}

impl Default for HistoryEntry {
    fn default() -> Self {
        Self {
            status: HistoryStatus::Pending,
            attempts: 0,
            last_attempt: None,
            last_error: None,
            last_session_id: None,
        }
    }
}

impl HistoryEntry {
    /// `abandoned`/`completed` are terminal: further `record_failure` is a no-op.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, HistoryStatus::Abandoned | HistoryStatus::Completed)
    }
}

/// Status of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Pending,
    Working,
    Completed,
    Failed,
    Abandoned,
    Skipped,
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryStatus::Pending => write!(f, "pending"),
            HistoryStatus::Working => write!(f, "working"),
            HistoryStatus::Completed => write!(f, "completed"),
            HistoryStatus::Failed => write!(f, "failed"),
            HistoryStatus::Abandoned => write!(f, "abandoned"),
            HistoryStatus::Skipped => write!(f, "skipped"),
        }
    }
}
