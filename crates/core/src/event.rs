// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The event catalogue.
//!
//! Events are value types: once emitted they are immutable and are never
//! mutated by a subscriber.

use crate::id::BeadId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single lifecycle event, tagged by `type`, carrying an RFC-3339 timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    #[serde(rename = "drain.start")]
    DrainStart {
        timestamp: DateTime<Utc>,
        work_dir: String,
    },
    #[serde(rename = "drain.stop")]
    DrainStop {
        timestamp: DateTime<Utc>,
        reason: String,
    },
    #[serde(rename = "drain.state_changed")]
    DrainStateChanged {
        timestamp: DateTime<Utc>,
        from: String,
        to: String,
    },
    #[serde(rename = "iteration.start")]
    IterationStart {
        timestamp: DateTime<Utc>,
        bead_id: BeadId,
        title: String,
        priority: i64,
        attempt: u32,
        top_level_id: Option<BeadId>,
        top_level_title: Option<String>,
    },
    #[serde(rename = "iteration.end")]
    IterationEnd {
        timestamp: DateTime<Utc>,
        bead_id: BeadId,
        success: bool,
        num_turns: u32,
        duration_ms: u64,
        total_cost_usd: f64,
        error: Option<String>,
        session_id: Option<String>,
    },
    #[serde(rename = "session.start")]
    SessionStart {
        timestamp: DateTime<Utc>,
        bead_id: BeadId,
        title: String,
    },
    #[serde(rename = "bead.abandoned")]
    BeadAbandoned {
        timestamp: DateTime<Utc>,
        bead_id: BeadId,
        attempts: u32,
        max_failures: u32,
        last_error: Option<String>,
    },
    #[serde(rename = "bead.changed")]
    BeadChanged {
        timestamp: DateTime<Utc>,
        bead_id: BeadId,
        old_state: Option<String>,
        new_state: Option<BeadChangedState>,
    },
    #[serde(rename = "epic.closed")]
    EpicClosed {
        timestamp: DateTime<Utc>,
        epic_id: BeadId,
        title: String,
        total_children: u32,
        triggering_bead_id: BeadId,
        close_reason: String,
    },
    #[serde(rename = "stall")]
    Stall {
        timestamp: DateTime<Utc>,
        bead_id: Option<BeadId>,
        title: Option<String>,
        reason: String,
        stall_type: StallType,
        created_beads: Vec<BeadId>,
    },
    #[serde(rename = "stall.cleared")]
    StallCleared {
        timestamp: DateTime<Utc>,
        bead_id: Option<BeadId>,
        action: StallClearAction,
    },
    #[serde(rename = "error")]
    Error {
        timestamp: DateTime<Utc>,
        message: String,
        severity: Severity,
    },
}

impl Event {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::DrainStart { timestamp, .. }
            | Event::DrainStop { timestamp, .. }
            | Event::DrainStateChanged { timestamp, .. }
            | Event::IterationStart { timestamp, .. }
            | Event::IterationEnd { timestamp, .. }
            | Event::SessionStart { timestamp, .. }
            | Event::BeadAbandoned { timestamp, .. }
            | Event::BeadChanged { timestamp, .. }
            | Event::EpicClosed { timestamp, .. }
            | Event::Stall { timestamp, .. }
            | Event::StallCleared { timestamp, .. }
            | Event::Error { timestamp, .. } => *timestamp,
        }
    }

    /// Short tag used in log lines and tests, independent of serde's wire tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::DrainStart { .. } => "drain.start",
            Event::DrainStop { .. } => "drain.stop",
            Event::DrainStateChanged { .. } => "drain.state_changed",
            Event::IterationStart { .. } => "iteration.start",
            Event::IterationEnd { .. } => "iteration.end",
            Event::SessionStart { .. } => "session.start",
            Event::BeadAbandoned { .. } => "bead.abandoned",
            Event::BeadChanged { .. } => "bead.changed",
            Event::EpicClosed { .. } => "epic.closed",
            Event::Stall { .. } => "stall",
            Event::StallCleared { .. } => "stall.cleared",
            Event::Error { .. } => "error",
        }
    }
}

/// New/updated state carried by a `bead.changed` event. `created_by` is how
/// the controller identifies beads it spawned itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeadChangedState {
    pub status: String,
    #[serde(default)]
    pub created_by: String,
}

/// Reason a selection attempt returned no bead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionReason {
    Success,
    NoReady,
    Backoff,
    MaxFailure,
}

impl fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionReason::Success => write!(f, "success"),
            SelectionReason::NoReady => write!(f, "no-ready"),
            SelectionReason::Backoff => write!(f, "backoff"),
            SelectionReason::MaxFailure => write!(f, "max-failure"),
        }
    }
}

/// The two stall kinds (spec glossary "Stall").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallType {
    Abandoned,
    Review,
}

/// How a stall was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallClearAction {
    Retry,
    Resume,
    AutoCleared,
}

/// Severity of an `error` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_flat_type_tag() {
        let event = Event::SessionStart {
            timestamp: DateTime::UNIX_EPOCH,
            bead_id: BeadId::new("A"),
            title: "fix thing".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session.start");
        assert_eq!(json["bead_id"], "A");
    }

    #[test]
    fn round_trips_through_json() {
        let event = Event::Stall {
            timestamp: DateTime::UNIX_EPOCH,
            bead_id: Some(BeadId::new("A")),
            title: Some("t".into()),
            reason: "max failures".into(),
            stall_type: StallType::Abandoned,
            created_beads: vec![],
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn unknown_fields_are_tolerated_on_read() {
        let json = r#"{"type":"error","timestamp":"1970-01-01T00:00:00Z","message":"m","severity":"warning","extra":123}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), "error");
    }
}
