// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-shaped request/response DTOs for the control surface.
//!
//! These name the shape a control socket would speak; nothing in this
//! crate binds them to an actual transport. A caller in-process uses
//! [`crate::DrainHandle`] directly and never touches these types.

use drain_core::BeadId;
use drain_engine::Status;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlRequest {
    Pause { graceful: bool },
    Resume,
    Stop { graceful: bool },
    Retry,
    Status,
    ResetHistory { bead_id: BeadId },
    ResetBead { bead_id: BeadId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ControlResponse {
    Ok,
    Status(StatusDto),
    Error { message: String },
}

/// Serializable mirror of [`drain_engine::Status`] (`Status` itself holds a
/// `&'static str`, which doesn't round-trip through `Deserialize`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDto {
    pub state: String,
    pub reported_state: String,
    pub current_bead: Option<BeadId>,
    pub current_turn: u32,
    pub stall_reason: Option<String>,
}

impl From<Status> for StatusDto {
    fn from(status: Status) -> Self {
        Self {
            state: status.state.to_string(),
            reported_state: status.reported_state.to_string(),
            current_bead: status.current_bead,
            current_turn: status.current_turn,
            stall_reason: status.stall_reason,
        }
    }
}
