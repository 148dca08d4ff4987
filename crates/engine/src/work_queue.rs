// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Owns the bead-history map, the active top-level id, and selection policy.

use drain_adapters::{ReadyFilter, TrackerClient, TrackerError};
use drain_core::{
    BackoffSchedule, Bead, BeadId, BeadStatus, Clock, HistoryEntry, HistoryStatus, SelectionReason,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// How candidates are restricted before sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Global,
    TopLevel,
}

#[derive(Debug, Clone, Default)]
pub struct WorkQueueConfig {
    pub label: Option<String>,
    pub unassigned_only: bool,
    pub excluded_labels: Vec<String>,
    pub epic: Option<BeadId>,
    pub selection_mode: SelectionMode,
    pub eager_switch: bool,
}

impl Default for SelectionMode {
    fn default() -> Self {
        SelectionMode::Global
    }
}

/// Aggregate counts for `stats()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkQueueStats {
    pub seen: u32,
    pub completed: u32,
    pub failed: u32,
    pub abandoned: u32,
    pub in_backoff_now: u32,
}

/// One row of `blocked_beads()`, sorted by shortest remaining backoff.
#[derive(Debug, Clone)]
pub struct BlockedBead {
    pub id: BeadId,
    pub attempts: u32,
    pub remaining: chrono::Duration,
}

/// `bead_state(id)` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeadState {
    Unknown,
    Failed,
    Abandoned,
    Skipped,
}

#[derive(Clone)]
pub struct WorkQueue<C: Clock> {
    history: Arc<RwLock<HashMap<BeadId, HistoryEntry>>>,
    active_top_level: Arc<RwLock<Option<(BeadId, String)>>>,
    config: WorkQueueConfig,
    backoff: BackoffSchedule,
    max_failures: u32,
    clock: C,
}

impl<C: Clock> WorkQueue<C> {
    pub fn new(config: WorkQueueConfig, backoff: BackoffSchedule, max_failures: u32, clock: C) -> Self {
        Self {
            history: Arc::new(RwLock::new(HashMap::new())),
            active_top_level: Arc::new(RwLock::new(None)),
            config,
            backoff,
            max_failures,
            clock,
        }
    }

    pub fn config(&self) -> &WorkQueueConfig {
        &self.config
    }

    /// `0` means abandonment is disabled.
    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    pub fn active_top_level(&self) -> Option<(BeadId, String)> {
        self.active_top_level.read().clone()
    }

    pub fn set_active_top_level(&self, entry: Option<(BeadId, String)>) {
        *self.active_top_level.write() = entry;
    }

    /// Global selection.
    pub async fn next(
        &self,
        tracker: &dyn TrackerClient,
    ) -> Result<(Option<Bead>, SelectionReason), TrackerError> {
        let filter = ReadyFilter {
            label: self.config.label.clone(),
            unassigned_only: self.config.unassigned_only,
        };
        let mut candidates = tracker.ready(filter).await?;

        if let Some(epic) = &self.config.epic {
            let all = tracker.list(None).await?;
            let descendants = build_descendant_set(epic, &all);
            candidates.retain(|b| descendants.contains(&b.id));
        }

        Ok(self.select_from(candidates))
    }

    /// Top-level selection.
    pub async fn next_top_level(
        &self,
        tracker: &dyn TrackerClient,
    ) -> Result<(Option<Bead>, SelectionReason), TrackerError> {
        if self.config.epic.is_some() || self.config.selection_mode == SelectionMode::Global {
            return self.next(tracker).await;
        }

        let all = tracker.list(None).await?;
        let mut top_level: Vec<&Bead> = all.iter().filter(|b| b.is_top_level()).collect();
        top_level.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));

        let active = self.active_top_level.read().clone();
        let mut chosen: Option<BeadId> = None;

        if let Some((active_id, _)) = &active {
            let descendants = build_descendant_set(active_id, &all);
            if self.has_ready_non_epic_descendant(&descendants, &all) {
                chosen = Some(active_id.clone());
            }
        }

        if chosen.is_none() {
            for candidate in &top_level {
                let descendants = build_descendant_set(&candidate.id, &all);
                if self.has_ready_non_epic_descendant(&descendants, &all) {
                    chosen = Some(candidate.id.clone());
                    self.set_active_top_level(Some((candidate.id.clone(), candidate.title.clone())));
                    break;
                }
            }
        }

        let Some(top_id) = chosen else {
            // Orphan safety net: nothing qualifies under top-level framing.
            return self.next(tracker).await;
        };

        let descendants = build_descendant_set(&top_id, &all);
        let candidates: Vec<Bead> = all
            .into_iter()
            .filter(|b| descendants.contains(&b.id) && !b.is_epic())
            .collect();

        Ok(self.select_from(candidates))
    }

    /// Whether any non-epic descendant of `top_id` is ready to run right
    /// now. Used by the eager-switch check.
    pub fn has_ready_work_under(&self, top_id: &BeadId, all: &[Bead]) -> bool {
        let descendants = build_descendant_set(top_id, all);
        self.has_ready_non_epic_descendant(&descendants, all)
    }

    /// Ready, ignoring history/backoff: a descendant merely in backoff still
    /// counts as ready work under its top-level, so stickiness and eager
    /// switch don't mistake "temporarily blocked" for "nothing left".
    fn has_ready_non_epic_descendant(&self, descendants: &HashSet<BeadId>, all: &[Bead]) -> bool {
        all.iter()
            .any(|b| descendants.contains(&b.id) && !b.is_epic() && matches!(b.status, BeadStatus::Open))
    }

    /// `(selectable, reason-if-blocked)`. `reason` is only populated for
    /// `failed` entries, since those are the only ones worth distinguishing
    /// when reporting why selection came up empty.
    fn selectable_with_reason(&self, id: &BeadId) -> (bool, Option<SelectionReason>) {
        let history = self.history.read();
        match history.get(id) {
            None => (true, None),
            Some(entry) => match entry.status {
                HistoryStatus::Completed | HistoryStatus::Skipped => (false, None),
                // `record_failure` already promotes to `Abandoned` the moment
                // attempts reach the threshold, so this is the case that
                // actually surfaces `MaxFailure` to callers.
                HistoryStatus::Abandoned => (false, Some(SelectionReason::MaxFailure)),
                HistoryStatus::Failed => {
                    if self.max_failures != 0 && entry.attempts >= self.max_failures {
                        (false, Some(SelectionReason::MaxFailure))
                    } else {
                        let delay = chrono::Duration::from_std(self.backoff.delay_for(entry.attempts))
                            .unwrap_or(chrono::Duration::zero());
                        let ready = match entry.last_attempt {
                            None => true,
                            Some(last) => self.clock.now() - last >= delay,
                        };
                        if ready {
                            (true, None)
                        } else {
                            (false, Some(SelectionReason::Backoff))
                        }
                    }
                }
                HistoryStatus::Pending | HistoryStatus::Working => (true, None),
            },
        }
    }

    /// Filters candidates, sorts, and picks, given a raw candidate list
    /// already restricted to the right scope.
    fn select_from(&self, candidates: Vec<Bead>) -> (Option<Bead>, SelectionReason) {
        let excluded = &self.config.excluded_labels;
        let mut saw_backoff = false;
        let mut saw_max_failure = false;

        let mut filtered: Vec<Bead> = candidates
            .into_iter()
            .filter(|b| !b.is_epic())
            .filter(|b| !b.labels.iter().any(|l| excluded.contains(l)))
            .filter(|b| {
                let (selectable, reason) = self.selectable_with_reason(&b.id);
                match reason {
                    Some(SelectionReason::MaxFailure) => saw_max_failure = true,
                    Some(SelectionReason::Backoff) => saw_backoff = true,
                    _ => {}
                }
                selectable
            })
            .collect();

        filtered.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));

        let Some(selected) = filtered.into_iter().next() else {
            let reason = if saw_max_failure && !saw_backoff {
                SelectionReason::MaxFailure
            } else if saw_backoff {
                SelectionReason::Backoff
            } else {
                SelectionReason::NoReady
            };
            return (None, reason);
        };

        let mut history = self.history.write();
        let entry = history.entry(selected.id.clone()).or_default();
        entry.status = HistoryStatus::Working;
        entry.attempts += 1;
        entry.last_attempt = Some(self.clock.now());

        (Some(selected), SelectionReason::Success)
    }

    pub fn record_success(&self, id: &BeadId) {
        let mut history = self.history.write();
        let entry = history.entry(id.clone()).or_default();
        entry.status = HistoryStatus::Completed;
    }

    pub fn record_failure(&self, id: &BeadId, err: &str) {
        let mut history = self.history.write();
        let entry = history.entry(id.clone()).or_default();
        if entry.is_terminal() {
            return;
        }
        entry.last_error = Some(err.to_string());
        entry.last_attempt = Some(self.clock.now());
        entry.status = if self.max_failures != 0 && entry.attempts >= self.max_failures {
            HistoryStatus::Abandoned
        } else {
            HistoryStatus::Failed
        };
    }

    pub fn record_skipped(&self, id: &BeadId) {
        let mut history = self.history.write();
        let entry = history.entry(id.clone()).or_default();
        entry.status = HistoryStatus::Skipped;
    }

    pub fn set_last_session_id(&self, id: &BeadId, session_id: Option<String>) {
        let mut history = self.history.write();
        let entry = history.entry(id.clone()).or_default();
        entry.last_session_id = session_id;
    }

    pub fn reset_history(&self, id: &BeadId) {
        self.history.write().remove(id);
    }

    pub fn reset_bead(&self, id: &BeadId) {
        let mut history = self.history.write();
        if let Some(entry) = history.get_mut(id) {
            entry.status = HistoryStatus::Pending;
            entry.attempts = 0;
            entry.last_attempt = None;
            entry.last_error = None;
        }
    }

    pub fn stats(&self) -> WorkQueueStats {
        let history = self.history.read();
        let mut stats = WorkQueueStats::default();
        stats.seen = history.len() as u32;
        for entry in history.values() {
            match entry.status {
                HistoryStatus::Completed => stats.completed += 1,
                HistoryStatus::Abandoned => stats.abandoned += 1,
                HistoryStatus::Failed => {
                    stats.failed += 1;
                    let delay = chrono::Duration::from_std(self.backoff.delay_for(entry.attempts))
                        .unwrap_or(chrono::Duration::zero());
                    let in_backoff = entry
                        .last_attempt
                        .map(|last| self.clock.now() - last < delay)
                        .unwrap_or(false);
                    if in_backoff {
                        stats.in_backoff_now += 1;
                    }
                }
                _ => {}
            }
        }
        stats
    }

    pub fn blocked_beads(&self) -> Vec<BlockedBead> {
        let history = self.history.read();
        let now = self.clock.now();
        let mut blocked: Vec<BlockedBead> = history
            .iter()
            .filter(|(_, e)| e.status == HistoryStatus::Failed)
            .filter_map(|(id, e)| {
                let delay = chrono::Duration::from_std(self.backoff.delay_for(e.attempts)).ok()?;
                let last = e.last_attempt?;
                let remaining = (last + delay) - now;
                if remaining > chrono::Duration::zero() {
                    Some(BlockedBead {
                        id: id.clone(),
                        attempts: e.attempts,
                        remaining,
                    })
                } else {
                    None
                }
            })
            .collect();
        blocked.sort_by_key(|b| b.remaining);
        blocked
    }

    pub fn bead_state(&self, id: &BeadId) -> (BeadState, u32, bool) {
        let history = self.history.read();
        match history.get(id) {
            None => (BeadState::Unknown, 0, false),
            Some(entry) => {
                let state = match entry.status {
                    HistoryStatus::Failed => BeadState::Failed,
                    HistoryStatus::Abandoned => BeadState::Abandoned,
                    HistoryStatus::Skipped => BeadState::Skipped,
                    _ => BeadState::Unknown,
                };
                let in_backoff = entry.status == HistoryStatus::Failed && {
                    let delay = chrono::Duration::from_std(self.backoff.delay_for(entry.attempts)).unwrap_or_default();
                    entry.last_attempt.map(|last| self.clock.now() - last < delay).unwrap_or(false)
                };
                (state, entry.attempts, in_backoff)
            }
        }
    }

    /// A single entry, if one exists.
    pub fn entry(&self, id: &BeadId) -> Option<HistoryEntry> {
        self.history.read().get(id).cloned()
    }

    /// Deep copy out, so callers cannot mutate internal state.
    pub fn history(&self) -> HashMap<BeadId, HistoryEntry> {
        self.history.read().clone()
    }

    /// Deep copy in; replaces the map wholesale.
    pub fn set_history(&self, history: HashMap<BeadId, HistoryEntry>) {
        *self.history.write() = history;
    }
}

/// Iterative fix-point: start with `{top_id}`, add any bead whose parent is
/// already in the set, until a pass adds nothing.
fn build_descendant_set(top_id: &BeadId, all: &[Bead]) -> HashSet<BeadId> {
    let mut set = HashSet::new();
    set.insert(top_id.clone());
    loop {
        let mut added = false;
        for bead in all {
            if set.contains(&bead.id) {
                continue;
            }
            if let Some(parent) = &bead.parent {
                if set.contains(parent) {
                    set.insert(bead.id.clone());
                    added = true;
                }
            }
        }
        if !added {
            break;
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use drain_adapters::FakeTrackerClient;
    use drain_core::{FakeClock, IssueType};

    fn bead(id: &str, priority: i64, status: BeadStatus, parent: Option<&str>, created_at: DateTime<Utc>) -> Bead {
        Bead {
            id: BeadId::new(id),
            title: format!("bead {id}"),
            description: String::new(),
            status,
            priority,
            issue_type: IssueType::Task,
            parent: parent.map(BeadId::new),
            labels: vec![],
            created_at,
            created_by: "someone".into(),
            updated_at: None,
        }
    }

    fn queue() -> WorkQueue<FakeClock> {
        WorkQueue::new(
            WorkQueueConfig::default(),
            BackoffSchedule {
                initial: std::time::Duration::from_millis(10),
                multiplier: 2.0,
                max: std::time::Duration::from_secs(3600),
            },
            2,
            FakeClock::default(),
        )
    }

    #[tokio::test]
    async fn empty_ready_yields_no_ready_without_history_mutation() {
        let tracker = FakeTrackerClient::new();
        let queue = queue();
        let (picked, reason) = queue.next(&tracker).await.unwrap();
        assert!(picked.is_none());
        assert_eq!(reason, SelectionReason::NoReady);
        assert!(queue.history().is_empty());
    }

    #[tokio::test]
    async fn selects_lowest_priority_then_oldest() {
        let tracker = FakeTrackerClient::new();
        tracker.insert(bead("B", 2, BeadStatus::Open, None, DateTime::UNIX_EPOCH));
        tracker.insert(bead("A", 1, BeadStatus::Open, None, DateTime::UNIX_EPOCH));
        let queue = queue();
        let (picked, reason) = queue.next(&tracker).await.unwrap();
        assert_eq!(reason, SelectionReason::Success);
        assert_eq!(picked.unwrap().id, "A");
    }

    #[tokio::test]
    async fn picking_marks_history_working_and_bumps_attempts() {
        let tracker = FakeTrackerClient::new();
        tracker.insert(bead("A", 1, BeadStatus::Open, None, DateTime::UNIX_EPOCH));
        let queue = queue();
        queue.next(&tracker).await.unwrap();
        let history = queue.history();
        let entry = history.get(&BeadId::new("A")).unwrap();
        assert_eq!(entry.status, HistoryStatus::Working);
        assert_eq!(entry.attempts, 1);
    }

    #[tokio::test]
    async fn abandons_after_max_failures() {
        let tracker = FakeTrackerClient::new();
        tracker.insert(bead("A", 1, BeadStatus::Open, None, DateTime::UNIX_EPOCH));
        let queue = queue();

        queue.next(&tracker).await.unwrap();
        queue.record_failure(&BeadId::new("A"), "boom");
        queue.next(&tracker).await.unwrap();
        queue.record_failure(&BeadId::new("A"), "boom again");

        let (picked, reason) = queue.next(&tracker).await.unwrap();
        assert!(picked.is_none());
        assert_eq!(reason, SelectionReason::MaxFailure);
        let (state, attempts, _) = queue.bead_state(&BeadId::new("A"));
        assert_eq!(state, BeadState::Abandoned);
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn reset_bead_makes_it_immediately_eligible() {
        let tracker = FakeTrackerClient::new();
        tracker.insert(bead("A", 1, BeadStatus::Open, None, DateTime::UNIX_EPOCH));
        let queue = queue();
        queue.next(&tracker).await.unwrap();
        queue.record_failure(&BeadId::new("A"), "boom");
        queue.reset_bead(&BeadId::new("A"));
        let (picked, reason) = queue.next(&tracker).await.unwrap();
        assert_eq!(reason, SelectionReason::Success);
        assert_eq!(picked.unwrap().id, "A");
    }

    #[tokio::test]
    async fn descendant_set_includes_transitive_children() {
        let tracker = FakeTrackerClient::new();
        tracker.insert(bead("EPIC", 1, BeadStatus::Open, None, DateTime::UNIX_EPOCH));
        tracker.insert(bead("CHILD", 1, BeadStatus::Open, Some("EPIC"), DateTime::UNIX_EPOCH));
        tracker.insert(bead("GRANDCHILD", 1, BeadStatus::Open, Some("CHILD"), DateTime::UNIX_EPOCH));
        let mut config = WorkQueueConfig::default();
        config.epic = Some(BeadId::new("EPIC"));
        let queue = WorkQueue::new(config, BackoffSchedule::default(), 5, FakeClock::default());
        let (picked, _) = queue.next(&tracker).await.unwrap();
        // Either CHILD or GRANDCHILD is eligible; EPIC itself never is.
        assert_ne!(picked.unwrap().id, "EPIC");
    }

    #[tokio::test]
    async fn has_ready_work_under_ignores_backoff() {
        let tracker = FakeTrackerClient::new();
        tracker.insert(bead("TOP", 1, BeadStatus::Open, None, DateTime::UNIX_EPOCH));
        tracker.insert(bead("CHILD", 1, BeadStatus::Open, Some("TOP"), DateTime::UNIX_EPOCH));
        let queue = queue();
        // Puts CHILD in backoff: a real failure just recorded, not yet due.
        queue.record_failure(&BeadId::new("CHILD"), "boom");
        let all = tracker.list(None).await.unwrap();
        assert!(queue.has_ready_work_under(&BeadId::new("TOP"), &all));
    }

    #[tokio::test]
    async fn set_history_round_trips() {
        let queue = queue();
        let mut history = HashMap::new();
        history.insert(BeadId::new("A"), HistoryEntry::default());
        queue.set_history(history.clone());
        assert_eq!(queue.history(), history);
    }
}
