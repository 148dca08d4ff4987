// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drain-adapters: external collaborators named as interfaces —
//! the tracker CLI (`br`) and the agent subprocess (`claude`) — behind
//! `async-trait` traits injected at construction.

pub mod session;
pub mod tracker;

pub use session::{
    AgentEnvelope, ClaudeSessionRunner, SessionError, SessionHandle, SessionOutcome,
    SessionRunner, SpawnConfig, TurnBoundaryFn,
};
pub use tracker::{
    BrTrackerClient, ClosedEpic, CommandOutput, CommandRunner, ReadyFilter, RealCommandRunner,
    StatusFilter, TrackerClient, TrackerError,
};

#[cfg(any(test, feature = "test-support"))]
pub use session::fake::FakeSessionRunner;
#[cfg(any(test, feature = "test-support"))]
pub use tracker::fake::FakeTrackerClient;
