//! Quality gate for generated arc proposals.
//!
//! A second, independent generation call ("critic") scores the proposal on
//! five 0–2 dimensions. A total below the threshold swaps the proposal for a
//! deterministic one built from the user's own answers. Any critic failure
//! keeps the original.

pub mod fallback;

pub use fallback::fallback_arc_proposal;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::handoff::extract_json_value;
use crate::llm::{ChatTurn, GenerationRequest, GenerationTransport, RequestMetadata};
use crate::workflow::CollectedData;

/// Scored dimensions, each 0–2.
pub const CRITIC_DIMENSIONS: [&str; 5] = [
    "specificity",
    "grounding",
    "coherence",
    "voice",
    "actionability",
];

/// Outcome of reviewing one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Critic scored at or above the threshold.
    Accepted { score: f64 },
    /// Critic scored below the threshold; `payload` is the fallback.
    Replaced { score: f64, payload: Value },
    /// Critic failed, timed out or answered with something unparsable.
    Unscored { reason: String },
}

impl GateDecision {
    /// The payload to keep: the fallback when replaced, otherwise `original`.
    pub fn into_payload(self, original: Value) -> Value {
        match self {
            Self::Replaced { payload, .. } => payload,
            _ => original,
        }
    }

    pub fn replaced(&self) -> bool {
        matches!(self, Self::Replaced { .. })
    }
}

/// Critic call plus threshold decision.
pub struct QualityGate {
    transport: Arc<dyn GenerationTransport>,
    threshold: f64,
    timeout: Duration,
}

impl QualityGate {
    pub fn new(transport: Arc<dyn GenerationTransport>, threshold: f64, timeout: Duration) -> Self {
        Self {
            transport,
            threshold,
            timeout,
        }
    }

    pub fn from_config(transport: Arc<dyn GenerationTransport>, config: &EngineConfig) -> Self {
        Self::new(transport, config.quality_threshold, config.critic_timeout)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score `payload` and decide whether to keep it.
    pub async fn review(
        &self,
        payload: &Value,
        collected: &CollectedData,
        metadata: &RequestMetadata,
    ) -> GateDecision {
        let request = GenerationRequest::new(
            vec![
                ChatTurn::system(build_critic_system_prompt()),
                ChatTurn::user(build_critic_user_prompt(payload, collected)),
            ],
            metadata.clone(),
        );

        let raw = match tokio::time::timeout(self.timeout, self.transport.generate(request)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(transport = self.transport.name(), error = %e, "Critic call failed, keeping proposal");
                return GateDecision::Unscored {
                    reason: e.to_string(),
                };
            }
            Err(_) => {
                warn!(
                    transport = self.transport.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Critic call timed out, keeping proposal"
                );
                return GateDecision::Unscored {
                    reason: format!("timed out after {:?}", self.timeout),
                };
            }
        };

        let Some(score) = parse_critic_total(&raw) else {
            debug!(raw_response = %raw, "Critic reply had no usable total, keeping proposal");
            return GateDecision::Unscored {
                reason: "unparsable critic reply".into(),
            };
        };

        if score < self.threshold {
            info!(score, threshold = self.threshold, "Proposal below quality threshold, using fallback");
            GateDecision::Replaced {
                score,
                payload: fallback_arc_proposal(collected),
            }
        } else {
            debug!(score, threshold = self.threshold, "Proposal passed quality gate");
            GateDecision::Accepted { score }
        }
    }
}

fn build_critic_system_prompt() -> String {
    "You are a strict reviewer of short personal-growth \"arc\" proposals.\n\n\
     Score the proposal on each dimension from 0 (poor) to 2 (strong):\n\
     - \"specificity\": concrete and particular to this person, not generic\n\
     - \"grounding\": uses what the user actually said\n\
     - \"coherence\": name and narrative agree with each other\n\
     - \"voice\": warm, plain, second person; no hype\n\
     - \"actionability\": suggests a direction the user can act on\n\n\
     Respond with ONLY a JSON object:\n\
     {\"specificity\": 0, \"grounding\": 0, \"coherence\": 0, \"voice\": 0, \"actionability\": 0, \"total\": 0}\n\n\
     \"total\" is the sum of the five scores (0-10)."
        .to_string()
}

fn build_critic_user_prompt(payload: &Value, collected: &CollectedData) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str("User answers:\n");
    if collected.is_empty() {
        prompt.push_str("  (none)\n");
    }
    for (key, value) in collected {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        prompt.push_str(&format!("  {key}: {rendered}\n"));
    }
    prompt.push_str("\nProposal:\n");
    prompt.push_str(&payload.to_string());
    prompt
}

/// Total score from a critic reply: `total` as a number or numeric string,
/// else the sum of whichever dimension scores are present.
fn parse_critic_total(raw: &str) -> Option<f64> {
    let value = extract_json_value(raw)?;
    let object = value.as_object()?;

    if let Some(total) = object.get("total").and_then(as_score) {
        return Some(total);
    }

    let scores: Vec<f64> = CRITIC_DIMENSIONS
        .iter()
        .filter_map(|d| object.get(*d).and_then(as_score))
        .collect();
    (!scores.is_empty()).then(|| scores.iter().sum())
}

fn as_score(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|n: &f64| n.is_finite())
}
