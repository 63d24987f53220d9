//! Structured handoff parser. Splits generator replies into visible prose
//! and an optional JSON payload.
//!
//! The generator is asked to write a marker line (e.g. `ARC_PROPOSAL_JSON:`)
//! followed by a JSON block. Nothing about that is guaranteed, so parsing
//! tolerates whitespace, one code fence, and commentary around the JSON, and
//! fails open: anything that does not parse is shown to the user as prose.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::PayloadKind;

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(ARC_PROPOSAL_JSON|GOAL_PROPOSAL_JSON|ACTIVITY_SUGGESTIONS_JSON|PROFILE_SUMMARY_JSON)[ \t]*:?",
    )
    .expect("marker pattern is valid")
});

static BLANK_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n[ \t]*\r?\n").expect("blank line pattern is valid"));

static FENCE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```[\w-]*$").expect("fence pattern is valid"));

/// A machine payload extracted from a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Handoff {
    /// Kind named by the marker; `None` for bare-JSON replies.
    pub kind: Option<PayloadKind>,
    pub value: Value,
}

/// Result of parsing one reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    /// Text to reveal in the transcript.
    pub visible: String,
    pub payload: Option<Handoff>,
}

impl ParsedReply {
    fn prose(text: &str) -> Self {
        Self {
            visible: text.to_string(),
            payload: None,
        }
    }
}

/// Split a raw reply into visible prose and an optional payload.
pub fn parse_reply(text: &str) -> ParsedReply {
    let marker = MARKER_RE
        .captures(text)
        .and_then(|caps| Some((caps.get(0)?, PayloadKind::from_marker(caps.get(1)?.as_str())?)));

    let Some((found, kind)) = marker else {
        return parse_unmarked(text);
    };

    let visible = strip_dangling_fence(text[..found.start()].trim_end());
    let candidate = normalize_candidate(&text[found.end()..]);

    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => ParsedReply {
            visible: visible.to_string(),
            payload: Some(Handoff {
                kind: Some(kind),
                value,
            }),
        },
        Err(e) => {
            debug!(marker = kind.marker(), error = %e, "Handoff JSON did not parse, showing reply as prose");
            ParsedReply::prose(text)
        }
    }
}

/// No marker: a reply that is entirely one JSON object is a payload with no
/// prose; anything else is prose.
fn parse_unmarked(text: &str) -> ParsedReply {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return ParsedReply {
                visible: String::new(),
                payload: Some(Handoff { kind: None, value }),
            };
        }
    }
    ParsedReply::prose(text)
}

/// Drop an opening fence line left dangling right before the marker.
fn strip_dangling_fence(visible: &str) -> &str {
    match visible.rsplit_once('\n') {
        Some((head, last)) if FENCE_LINE_RE.is_match(last.trim()) => head.trim_end(),
        None if FENCE_LINE_RE.is_match(visible.trim()) => "",
        _ => visible,
    }
}

/// Remove one outer fence, opening and/or closing.
fn strip_fence(s: &str) -> &str {
    let mut s = s.trim();
    if s.starts_with("```") {
        s = s.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    }
    let trimmed_end = s.trim_end();
    if let Some(inner) = trimmed_end.strip_suffix("```") {
        s = inner;
    }
    s.trim()
}

/// Narrow the text after a marker down to the JSON block.
fn normalize_candidate(raw: &str) -> &str {
    let mut s = strip_fence(raw);

    if let Some(found) = BLANK_LINE_RE.find(s) {
        s = &s[..found.start()];
    }

    if let Some(start) = s.find(['{', '[']) {
        s = &s[start..];
    }

    slice_to_closer(s).trim()
}

/// Truncate after the last closer matching the opening bracket.
fn slice_to_closer(s: &str) -> &str {
    let closer = match s.as_bytes().first() {
        Some(b'{') => '}',
        Some(b'[') => ']',
        _ => return s,
    };
    match s.rfind(closer) {
        Some(end) => &s[..=end],
        None => s,
    }
}

/// Pull a JSON value out of text that should be "only JSON" but may be
/// fenced or wrapped in commentary. Used for critic replies.
pub fn extract_json_value(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let unfenced = strip_fence(trimmed);
    if let Ok(value) = serde_json::from_str(unfenced) {
        return Some(value);
    }

    let start = unfenced.find(['{', '['])?;
    serde_json::from_str(slice_to_closer(&unfenced[start..])).ok()
}
