// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prompt template loading and variable expansion.

use drain_core::Bead;
use std::fs;
use std::path::Path;

/// Builtin prompt used when no template path is configured.
pub const DEFAULT_TEMPLATE: &str = "Work on {BeadID}: {BeadTitle}\n\n{BeadDescription}";

/// Builtin follow-up template, used for the shorter-turn-limit second pass.
pub const DEFAULT_FOLLOW_UP_TEMPLATE: &str =
    "Follow up on {BeadID}: {BeadTitle}. Confirm the work is complete and close it out.";

/// Loaded prompt text with `{BeadID}`, `{BeadTitle}`, `{BeadDescription}`,
/// `{Label}`, `{BeadParent}` substitution.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn from_builtin(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Loads from `path` if given, falling back to `default` on any I/O
    /// error (best effort — a missing custom template should not abort a
    /// drain run).
    pub fn load(path: Option<&Path>, default: &str) -> Self {
        match path {
            Some(path) => match fs::read_to_string(path) {
                Ok(text) => Self { text },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "falling back to builtin prompt template");
                    Self::from_builtin(default)
                }
            },
            None => Self::from_builtin(default),
        }
    }

    pub fn expand(&self, bead: &Bead, label: Option<&str>) -> String {
        self.text
            .replace("{BeadID}", bead.id.as_str())
            .replace("{BeadTitle}", &bead.title)
            .replace("{BeadDescription}", &bead.description)
            .replace("{Label}", label.unwrap_or_default())
            .replace("{BeadParent}", bead.parent.as_ref().map(|p| p.as_str()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use drain_core::{BeadId, BeadStatus, IssueType};

    fn bead() -> Bead {
        Bead {
            id: BeadId::new("A"),
            title: "fix thing".into(),
            description: "do the fix".into(),
            status: BeadStatus::Open,
            priority: 1,
            issue_type: IssueType::Task,
            parent: Some(BeadId::new("P")),
            labels: vec![],
            created_at: DateTime::UNIX_EPOCH,
            created_by: "someone".into(),
            updated_at: None,
        }
    }

    #[test]
    fn expands_all_variables() {
        let template = PromptTemplate::from_builtin("{BeadID} {BeadTitle} {BeadDescription} {Label} {BeadParent}");
        let expanded = template.expand(&bead(), Some("bug"));
        assert_eq!(expanded, "A fix thing do the fix bug P");
    }

    #[test]
    fn missing_label_and_parent_expand_empty() {
        let mut b = bead();
        b.parent = None;
        let template = PromptTemplate::from_builtin("[{Label}][{BeadParent}]");
        assert_eq!(template.expand(&b, None), "[][]");
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let template = PromptTemplate::load(Some(Path::new("/nonexistent/path/template.txt")), DEFAULT_TEMPLATE);
        assert!(template.expand(&bead(), None).contains("fix thing"));
    }
}
