//! Structured handoff: machine payloads embedded in generator prose.
//!
//! The system prompt asks the generator to emit one of a fixed set of
//! marker lines followed by JSON. [`parse_reply`] recovers the payload;
//! [`PendingPayloads`] holds the latest unconfirmed payload per kind.

pub mod parser;

pub use parser::{Handoff, ParsedReply, extract_json_value, parse_reply};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kinds of structured payload the generator can hand off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    ArcProposal,
    GoalProposal,
    ActivitySuggestions,
    ProfileSummary,
}

impl PayloadKind {
    pub const ALL: [PayloadKind; 4] = [
        Self::ArcProposal,
        Self::GoalProposal,
        Self::ActivitySuggestions,
        Self::ProfileSummary,
    ];

    /// Marker token the generator writes before the JSON block.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::ArcProposal => "ARC_PROPOSAL_JSON",
            Self::GoalProposal => "GOAL_PROPOSAL_JSON",
            Self::ActivitySuggestions => "ACTIVITY_SUGGESTIONS_JSON",
            Self::ProfileSummary => "PROFILE_SUMMARY_JSON",
        }
    }

    pub fn from_marker(marker: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.marker() == marker)
    }

    /// Key used when a confirmed payload is merged into collected data.
    pub fn key(&self) -> &'static str {
        match self {
            Self::ArcProposal => "arc_proposal",
            Self::GoalProposal => "goal_proposal",
            Self::ActivitySuggestions => "activity_suggestions",
            Self::ProfileSummary => "profile_summary",
        }
    }
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Latest unconfirmed payload per kind. A new payload replaces, never
/// merges with, the pending one of the same kind.
#[derive(Debug, Default, Clone)]
pub struct PendingPayloads {
    slots: HashMap<PayloadKind, Value>,
}

impl PendingPayloads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, returning the payload it replaced.
    pub fn insert(&mut self, kind: PayloadKind, value: Value) -> Option<Value> {
        self.slots.insert(kind, value)
    }

    pub fn get(&self, kind: PayloadKind) -> Option<&Value> {
        self.slots.get(&kind)
    }

    /// Remove and return the pending payload (on confirmation).
    pub fn take(&mut self, kind: PayloadKind) -> Option<Value> {
        self.slots.remove(&kind)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// JSON object keyed by payload kind.
    pub fn to_json(&self) -> Map<String, Value> {
        self.slots
            .iter()
            .map(|(kind, value)| (kind.key().to_string(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn markers_round_trip() {
        for kind in PayloadKind::ALL {
            assert_eq!(PayloadKind::from_marker(kind.marker()), Some(kind));
        }
        assert_eq!(PayloadKind::from_marker("OTHER_JSON"), None);
    }

    #[test]
    fn display_matches_serde() {
        for kind in PayloadKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(format!("\"{kind}\""), json);
        }
    }

    #[test]
    fn new_payload_replaces_without_merging() {
        let mut pending = PendingPayloads::new();
        pending.insert(PayloadKind::ArcProposal, json!({"name": "A", "narrative": "x"}));
        let replaced = pending.insert(PayloadKind::ArcProposal, json!({"name": "B"}));
        assert_eq!(replaced, Some(json!({"name": "A", "narrative": "x"})));
        assert_eq!(pending.get(PayloadKind::ArcProposal), Some(&json!({"name": "B"})));
    }

    #[test]
    fn kinds_are_independent() {
        let mut pending = PendingPayloads::new();
        pending.insert(PayloadKind::ArcProposal, json!(1));
        pending.insert(PayloadKind::GoalProposal, json!(2));
        assert_eq!(pending.take(PayloadKind::ArcProposal), Some(json!(1)));
        assert!(pending.get(PayloadKind::ArcProposal).is_none());
        assert_eq!(pending.to_json()["goal_proposal"], json!(2));
    }
}
