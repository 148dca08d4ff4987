// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `DrainHandle`: the in-process control surface.
//!
//! A thin, non-generic facade over [`ControllerHandle`] — everything a
//! caller (a CLI subcommand, a wire-protocol listener, a test) needs to
//! drive a running controller without naming its `<T, R, C>` parameters.

use drain_core::BeadId;
use drain_engine::{ControllerHandle, EventReceiver, Status};

#[derive(Clone)]
pub struct DrainHandle {
    inner: ControllerHandle,
}

impl DrainHandle {
    pub fn new(inner: ControllerHandle) -> Self {
        Self { inner }
    }

    pub fn pause(&self) {
        self.inner.pause();
    }

    pub fn graceful_pause(&self) {
        self.inner.graceful_pause();
    }

    pub fn resume(&self) {
        self.inner.resume();
    }

    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn graceful_stop(&self) {
        self.inner.graceful_stop();
    }

    pub fn retry(&self) {
        self.inner.retry();
    }

    pub fn status(&self) -> Status {
        self.inner.status()
    }

    pub fn events(&self) -> EventReceiver {
        self.inner.events()
    }

    pub fn reset_history(&self, id: &BeadId) {
        self.inner.reset_history(id);
    }

    pub fn reset_bead(&self, id: &BeadId) {
        self.inner.reset_bead(id);
    }
}

#[cfg(test)]
#[path = "handle_tests.rs"]
mod tests;
