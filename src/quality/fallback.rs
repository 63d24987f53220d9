//! Deterministic arc proposal built from collected answers. No network.

use serde_json::{Value, json};

use crate::workflow::CollectedData;
use crate::workflow::builtin::keys;

const DEFAULT_DOMAIN: &str = "Personal growth";
const DEFAULT_MOTIVATION: &str = "it matters to you right now";
const DEFAULT_IDENTITY: &str = "someone who keeps showing up";

/// Build `{name, narrative}` from `arc_domain`, `arc_motivation` and
/// `arc_identity`, substituting defaults for anything missing or blank.
pub fn fallback_arc_proposal(collected: &CollectedData) -> Value {
    let domain = answer(collected, keys::ARC_DOMAIN).unwrap_or_else(|| DEFAULT_DOMAIN.to_string());
    let motivation = answer(collected, keys::ARC_MOTIVATION)
        .unwrap_or_else(|| DEFAULT_MOTIVATION.to_string());
    let identity =
        answer(collected, keys::ARC_IDENTITY).unwrap_or_else(|| DEFAULT_IDENTITY.to_string());

    let name = format!("{}: Becoming {}", title_case(&domain), strip_article(&identity));
    let narrative = format!(
        "This arc is about {}. You're investing here because {}. \
         Over the coming weeks, each small step is practice at being {}.",
        lower_first(&domain),
        trim_sentence(&lower_first(&motivation)),
        trim_sentence(&identity),
    );

    json!({ "name": name, "narrative": narrative })
}

/// Non-blank answer as text. Non-string values use their JSON rendering.
fn answer(collected: &CollectedData, key: &str) -> Option<String> {
    let text = match collected.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Null => return None,
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn strip_article(s: &str) -> &str {
    let trimmed = trim_sentence(s);
    for article in ["a ", "an ", "the ", "A ", "An ", "The "] {
        if let Some(rest) = trimmed.strip_prefix(article) {
            return rest;
        }
    }
    trimmed
}

fn trim_sentence(s: &str) -> &str {
    s.trim().trim_end_matches(['.', '!', '?'])
}
