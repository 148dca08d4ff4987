// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable state-file schema.
//!
//! Plain data: no I/O. [`StateSink`](../../drain_storage) owns reading,
//! atomically writing, and versioning this shape; [`Controller`]
//! (../../drain_engine) owns applying it back to runtime state on restore.

use crate::bead::BeadId;
use crate::event::StallType;
use crate::history::HistoryEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Current schema major version. Readers MUST refuse newer majors
/// Loading refuses a file from a newer, incompatible major version.
pub const STATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub history: HashMap<BeadId, HistoryEntry>,
    #[serde(default)]
    pub active_top_level: Option<BeadId>,
    #[serde(default)]
    pub active_top_level_title: Option<String>,
    #[serde(default)]
    pub stalled_bead_id: Option<BeadId>,
    #[serde(default)]
    pub stalled_bead_title: Option<String>,
    #[serde(default)]
    pub stall_reason: Option<String>,
    #[serde(default)]
    pub stalled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stall_type: Option<StallType>,
    #[serde(default)]
    pub created_beads: Vec<BeadId>,
}

impl StateSnapshot {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            version: STATE_SCHEMA_VERSION,
            updated_at: now,
            history: HashMap::new(),
            active_top_level: None,
            active_top_level_title: None,
            stalled_bead_id: None,
            stalled_bead_title: None,
            stall_reason: None,
            stalled_at: None,
            stall_type: None,
            created_beads: Vec::new(),
        }
    }
}
