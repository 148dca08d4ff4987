// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The streaming-JSON envelope taxonomy consumed from agent stdout
//! Unknown types and fields are
//! ignored — this taxonomy is explicitly flat and extensible.

use serde::Deserialize;

/// One decoded line of the agent's stdout stream.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<MessageBody>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub content: Vec<ContentItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub tool_use_id: Option<String>,
}

impl AgentEnvelope {
    /// A `user` envelope whose content includes a `tool_result` item marks
    /// a turn boundary.
    pub fn is_turn_boundary(&self) -> bool {
        self.kind == "user"
            && self
                .message
                .as_ref()
                .map(|m| m.content.iter().any(|c| c.kind == "tool_result"))
                .unwrap_or(false)
    }

    pub fn is_session_init(&self) -> bool {
        self.kind == "system" && self.subtype.as_deref() == Some("init")
    }

    pub fn is_success_result(&self) -> bool {
        self.kind == "result" && self.subtype.as_deref() == Some("success")
    }

    pub fn is_error_result(&self) -> bool {
        self.kind == "result" && self.subtype.as_deref() == Some("error_tool_use")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_with_tool_result_is_turn_boundary() {
        let json = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"x"}]}}"#;
        let env: AgentEnvelope = serde_json::from_str(json).unwrap();
        assert!(env.is_turn_boundary());
    }

    #[test]
    fn user_without_tool_result_is_not_turn_boundary() {
        let json = r#"{"type":"user","message":{"content":[{"type":"text"}]}}"#;
        let env: AgentEnvelope = serde_json::from_str(json).unwrap();
        assert!(!env.is_turn_boundary());
    }

    #[test]
    fn unknown_type_parses_and_matches_nothing() {
        let json = r#"{"type":"progress_ping","foo":"bar"}"#;
        let env: AgentEnvelope = serde_json::from_str(json).unwrap();
        assert!(!env.is_turn_boundary());
        assert!(!env.is_session_init());
        assert!(!env.is_success_result());
        assert!(!env.is_error_result());
    }

    #[test]
    fn result_success_carries_cost_and_turns() {
        let json = r#"{"type":"result","subtype":"success","total_cost_usd":0.05,"num_turns":3,"session_id":"s1"}"#;
        let env: AgentEnvelope = serde_json::from_str(json).unwrap();
        assert!(env.is_success_result());
        assert_eq!(env.total_cost_usd, Some(0.05));
        assert_eq!(env.num_turns, Some(3));
    }
}
