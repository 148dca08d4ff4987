// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The issue ("bead") as reported by the external tracker.

use crate::id::BeadId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A tracked issue. Owned by the external tracker; the core holds only
/// transient copies returned from `show`/`list`/`ready`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bead {
    pub id: BeadId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: BeadStatus,
    pub priority: i64,
    pub issue_type: IssueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<BeadId>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Bead {
    /// Epics are organizational containers and are never selected as work.
    pub fn is_epic(&self) -> bool {
        self.issue_type == IssueType::Epic
    }

    /// A top-level item is an epic or an issue with no parent.
    pub fn is_top_level(&self) -> bool {
        self.is_epic() || self.parent.is_none()
    }
}

/// Status as reported by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadStatus {
    Open,
    InProgress,
    Closed,
    Completed,
}

impl BeadStatus {
    /// Ground-truth success: the tracker reports the bead closed or completed.
    pub fn is_done(&self) -> bool {
        matches!(self, BeadStatus::Closed | BeadStatus::Completed)
    }
}

impl fmt::Display for BeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeadStatus::Open => write!(f, "open"),
            BeadStatus::InProgress => write!(f, "in_progress"),
            BeadStatus::Closed => write!(f, "closed"),
            BeadStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Issue type as reported by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Task,
    Bug,
    Epic,
    #[serde(other)]
    Other,
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueType::Task => write!(f, "task"),
            IssueType::Bug => write!(f, "bug"),
            IssueType::Epic => write!(f, "epic"),
            IssueType::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bead(issue_type: IssueType, parent: Option<&str>) -> Bead {
        Bead {
            id: BeadId::new("A"),
            title: "t".into(),
            description: String::new(),
            status: BeadStatus::Open,
            priority: 1,
            issue_type,
            parent: parent.map(BeadId::new),
            labels: vec![],
            created_at: DateTime::UNIX_EPOCH,
            created_by: "atari-drain".into(),
            updated_at: None,
        }
    }

    #[test]
    fn epic_is_top_level_regardless_of_parent() {
        assert!(bead(IssueType::Epic, Some("P")).is_top_level());
    }

    #[test]
    fn parentless_task_is_top_level() {
        assert!(bead(IssueType::Task, None).is_top_level());
    }

    #[test]
    fn parented_task_is_not_top_level() {
        assert!(!bead(IssueType::Task, Some("P")).is_top_level());
    }

    #[test]
    fn status_is_done() {
        assert!(BeadStatus::Closed.is_done());
        assert!(BeadStatus::Completed.is_done());
        assert!(!BeadStatus::InProgress.is_done());
    }
}
