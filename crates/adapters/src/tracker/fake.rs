// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory [`TrackerClient`] for engine tests (feature `test-support`).

use super::{ClosedEpic, ReadyFilter, StatusFilter, TrackerClient, TrackerError};
use async_trait::async_trait;
use drain_core::{Bead, BeadId, BeadStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Drives a [`TrackerClient`] from an in-memory bead table, so engine tests
/// never need a real `br` binary on PATH.
#[derive(Clone, Default)]
pub struct FakeTrackerClient {
    beads: Arc<Mutex<HashMap<BeadId, Bead>>>,
    eligible_epics: Arc<Mutex<Vec<ClosedEpic>>>,
    comments: Arc<Mutex<Vec<(BeadId, String)>>>,
}

impl FakeTrackerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bead: Bead) {
        self.beads.lock().insert(bead.id.clone(), bead);
    }

    pub fn set_eligible_epics(&self, epics: Vec<ClosedEpic>) {
        *self.eligible_epics.lock() = epics;
    }

    pub fn comments_for(&self, id: &BeadId) -> Vec<String> {
        self.comments
            .lock()
            .iter()
            .filter(|(bead_id, _)| bead_id == id)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    pub fn status_of(&self, id: &BeadId) -> Option<BeadStatus> {
        self.beads.lock().get(id).map(|b| b.status)
    }
}

#[async_trait]
impl TrackerClient for FakeTrackerClient {
    async fn show(&self, id: &BeadId) -> Result<Option<Bead>, TrackerError> {
        Ok(self.beads.lock().get(id).cloned())
    }

    async fn list(&self, filter: Option<StatusFilter>) -> Result<Vec<Bead>, TrackerError> {
        let status = filter.and_then(|f| f.status);
        Ok(self
            .beads
            .lock()
            .values()
            .filter(|b| status.as_deref().map(|s| b.status.to_string() == s).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn ready(&self, filter: ReadyFilter) -> Result<Vec<Bead>, TrackerError> {
        Ok(self
            .beads
            .lock()
            .values()
            .filter(|b| matches!(b.status, BeadStatus::Open))
            .filter(|b| {
                filter
                    .label
                    .as_ref()
                    .map(|l| b.labels.iter().any(|x| x == l))
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn labels(&self, id: &BeadId) -> Result<Vec<String>, TrackerError> {
        Ok(self
            .beads
            .lock()
            .get(id)
            .map(|b| b.labels.clone())
            .unwrap_or_default())
    }

    async fn update_status(
        &self,
        id: &BeadId,
        status: BeadStatus,
        notes: &str,
    ) -> Result<(), TrackerError> {
        if let Some(bead) = self.beads.lock().get_mut(id) {
            bead.status = status;
        }
        self.comments.lock().push((id.clone(), notes.to_string()));
        Ok(())
    }

    async fn comment(&self, id: &BeadId, message: &str) -> Result<(), TrackerError> {
        self.comments.lock().push((id.clone(), message.to_string()));
        Ok(())
    }

    async fn close(&self, id: &BeadId, reason: &str) -> Result<(), TrackerError> {
        if let Some(bead) = self.beads.lock().get_mut(id) {
            bead.status = BeadStatus::Closed;
        }
        self.comments.lock().push((id.clone(), reason.to_string()));
        Ok(())
    }

    async fn close_eligible_epics(&self) -> Result<Vec<ClosedEpic>, TrackerError> {
        Ok(std::mem::take(&mut self.eligible_epics.lock()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn bead(id: &str, status: BeadStatus) -> Bead {
        Bead {
            id: BeadId::new(id),
            title: "t".into(),
            description: String::new(),
            status,
            priority: 1,
            issue_type: drain_core::IssueType::Task,
            parent: None,
            labels: vec![],
            created_at: DateTime::UNIX_EPOCH,
            created_by: "x".into(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn ready_only_returns_open_beads() {
        let tracker = FakeTrackerClient::new();
        tracker.insert(bead("A", BeadStatus::Open));
        tracker.insert(bead("B", BeadStatus::Closed));
        let ready = tracker.ready(ReadyFilter::default()).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "A");
    }

    #[tokio::test]
    async fn close_updates_status() {
        let tracker = FakeTrackerClient::new();
        tracker.insert(bead("A", BeadStatus::Open));
        tracker.close(&BeadId::new("A"), "done").await.unwrap();
        assert_eq!(tracker.status_of(&BeadId::new("A")), Some(BeadStatus::Closed));
    }
}
