// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-by-line decoder for the agent stdout stream.
//!
//! Tolerates blank lines, unknown envelope types, and invalid JSON on a
//! single line: logs and continues. Returns only when the stream closes.

use super::envelope::AgentEnvelope;
use super::SessionOutcome;

/// What the parser learned from one line of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Line was blank, unknown, or malformed. Nothing to act on.
    Ignored,
    /// `system`/`init` — session id captured onto the running outcome.
    SessionInit,
    /// `user` envelope with a `tool_result` — a turn completed.
    TurnBoundary,
    /// `result`/`success` — terminal.
    Success,
    /// `result`/`error_tool_use` — terminal.
    ErrorResult,
}

/// Stateful line-by-line envelope parser. One instance per session attempt.
#[derive(Debug, Default)]
pub struct SessionLogParser {
    pub turns: u32,
    pub invalid_lines: u32,
    pub outcome: SessionOutcome,
}

impl SessionLogParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line of stdout. Never panics on malformed input.
    pub fn feed(&mut self, line: &str) -> ParseOutcome {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return ParseOutcome::Ignored;
        }

        let envelope: AgentEnvelope = match serde_json::from_str(trimmed) {
            Ok(env) => env,
            Err(e) => {
                self.invalid_lines += 1;
                self.outcome.invalid_lines = self.invalid_lines;
                tracing::warn!(error = %e, line = %trimmed, "invalid agent stream line, skipping");
                return ParseOutcome::Ignored;
            }
        };

        if envelope.is_session_init() {
            self.outcome.session_id = envelope.session_id.clone();
            return ParseOutcome::SessionInit;
        }

        if envelope.is_turn_boundary() {
            self.turns += 1;
            self.outcome.num_turns = self.turns;
            return ParseOutcome::TurnBoundary;
        }

        if envelope.is_success_result() {
            self.outcome.num_turns = envelope.num_turns.unwrap_or(self.turns);
            self.outcome.total_cost_usd = envelope.total_cost_usd.unwrap_or(0.0);
            if envelope.session_id.is_some() {
                self.outcome.session_id = envelope.session_id.clone();
            }
            return ParseOutcome::Success;
        }

        if envelope.is_error_result() {
            self.outcome.error = envelope.error.clone().or_else(|| Some("agent reported a tool-use error".into()));
            return ParseOutcome::ErrorResult;
        }

        ParseOutcome::Ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_ignored() {
        let mut parser = SessionLogParser::new();
        assert_eq!(parser.feed(""), ParseOutcome::Ignored);
        assert_eq!(parser.feed("   "), ParseOutcome::Ignored);
        assert_eq!(parser.invalid_lines, 0);
    }

    #[test]
    fn invalid_json_increments_counter_and_continues() {
        let mut parser = SessionLogParser::new();
        assert_eq!(parser.feed("{not json"), ParseOutcome::Ignored);
        assert_eq!(parser.invalid_lines, 1);
        assert_eq!(
            parser.feed(r#"{"type":"system","subtype":"init","session_id":"s1"}"#),
            ParseOutcome::SessionInit
        );
    }

    #[test]
    fn counts_turns_from_tool_result() {
        let mut parser = SessionLogParser::new();
        let line = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"x"}]}}"#;
        parser.feed(line);
        parser.feed(line);
        assert_eq!(parser.turns, 2);
    }

    #[test]
    fn success_result_populates_outcome() {
        let mut parser = SessionLogParser::new();
        let line = r#"{"type":"result","subtype":"success","total_cost_usd":0.05,"num_turns":3,"session_id":"s1"}"#;
        assert_eq!(parser.feed(line), ParseOutcome::Success);
        assert_eq!(parser.outcome.total_cost_usd, 0.05);
        assert_eq!(parser.outcome.num_turns, 3);
        assert_eq!(parser.outcome.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn error_result_populates_error() {
        let mut parser = SessionLogParser::new();
        let line = r#"{"type":"result","subtype":"error_tool_use","error":"bash exited 1"}"#;
        assert_eq!(parser.feed(line), ParseOutcome::ErrorResult);
        assert_eq!(parser.outcome.error.as_deref(), Some("bash exited 1"));
    }

    #[test]
    fn unknown_type_is_ignored_without_error() {
        let mut parser = SessionLogParser::new();
        assert_eq!(parser.feed(r#"{"type":"assistant","message":{"content":[]}}"#), ParseOutcome::Ignored);
        assert_eq!(parser.invalid_lines, 0);
    }
}
