//! Configuration types.

use std::time::Duration;

/// Critic total (out of 10) below which a generated arc proposal is replaced
/// by the deterministic fallback.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 6.0;

/// Engine configuration: reveal pacing, draft debounce, quality gate and
/// transport timeouts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Characters revealed per tick.
    pub reveal_chunk_chars: usize,
    /// Delay between reveal ticks.
    pub reveal_tick: Duration,
    /// Pause inserted when the reveal reaches a paragraph boundary.
    pub paragraph_pause: Duration,
    /// Quiet period before a draft is written.
    pub draft_debounce: Duration,
    /// Critic total below which the fallback payload is substituted.
    pub quality_threshold: f64,
    /// Upper bound on the critic call.
    pub critic_timeout: Duration,
    /// Upper bound on a primary generation call.
    pub transport_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reveal_chunk_chars: 3,
            reveal_tick: Duration::from_millis(18),
            paragraph_pause: Duration::from_millis(270), // 15 ticks
            draft_debounce: Duration::from_millis(750),
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            critic_timeout: Duration::from_secs(12),
            transport_timeout: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// Build from `GUIDED_CHAT_*` environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reveal_chunk_chars: env_parse("GUIDED_CHAT_REVEAL_CHUNK_CHARS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.reveal_chunk_chars),
            reveal_tick: env_millis("GUIDED_CHAT_REVEAL_TICK_MS").unwrap_or(defaults.reveal_tick),
            paragraph_pause: env_millis("GUIDED_CHAT_PARAGRAPH_PAUSE_MS")
                .unwrap_or(defaults.paragraph_pause),
            draft_debounce: env_millis("GUIDED_CHAT_DRAFT_DEBOUNCE_MS")
                .unwrap_or(defaults.draft_debounce),
            quality_threshold: env_parse("GUIDED_CHAT_QUALITY_THRESHOLD")
                .unwrap_or(defaults.quality_threshold),
            critic_timeout: env_millis("GUIDED_CHAT_CRITIC_TIMEOUT_MS")
                .unwrap_or(defaults.critic_timeout),
            transport_timeout: env_millis("GUIDED_CHAT_TRANSPORT_TIMEOUT_MS")
                .unwrap_or(defaults.transport_timeout),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key = key, value = %raw, "Ignoring unparsable config value");
            None
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}
