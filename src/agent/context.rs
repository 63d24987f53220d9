//! Generator context assembly for a workflow step.

use serde_json::Value;

use crate::llm::ChatTurn;
use crate::workflow::{CollectedData, Step};

/// Whether a collected value carries no information worth restating.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// System turn restating collected answers as ground truth. `None` when
/// nothing non-empty has been collected.
pub fn collected_data_turn(collected: &CollectedData) -> Option<ChatTurn> {
    let lines: Vec<String> = collected
        .iter()
        .filter(|(_, value)| !is_empty_value(value))
        .map(|(key, value)| match value {
            Value::String(s) => format!("- {key}: {}", s.trim()),
            other => format!("- {key}: {other}"),
        })
        .collect();

    if lines.is_empty() {
        return None;
    }

    Some(ChatTurn::system(format!(
        "Authoritative inputs collected so far. Treat these as true and do not ask for them again:\n{}",
        lines.join("\n")
    )))
}

/// System turn carrying the step's prompt template and validation hint.
pub fn step_prompt_turn(step: &Step) -> Option<ChatTurn> {
    let template = step.prompt_template.as_deref()?;
    let content = match step.validation_hint.as_deref() {
        Some(hint) if !hint.trim().is_empty() => {
            format!("{template}\n\nRequirements: {hint}")
        }
        _ => template.to_string(),
    };
    Some(ChatTurn::system(content))
}

/// Full generator input: the transcript history followed by the synthesized
/// system turns for `step`.
pub fn build_turns(history: Vec<ChatTurn>, collected: &CollectedData, step: &Step) -> Vec<ChatTurn> {
    let mut turns = history;
    turns.extend(collected_data_turn(collected));
    turns.extend(step_prompt_turn(step));
    turns
}
