// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drain-storage: the two durable Event Bus subscribers.
//!
//! [`LogSink`] appends every event as one JSON line; [`StateSink`] keeps
//! the bead-history/stall snapshot current and atomically persists it.
//! Neither ever propagates its own I/O failures back to the controller —
//! they log and keep going.

mod log_sink;
mod state_sink;

pub use log_sink::{LogSink, LogSinkHandle};
pub use state_sink::{StateSink, StateSinkError, StateSinkHandle};
