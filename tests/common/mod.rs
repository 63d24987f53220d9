//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use guided_chat::agent::SessionEvent;
use guided_chat::config::EngineConfig;
use guided_chat::error::TransportError;
use guided_chat::llm::{GenerationRequest, GenerationTransport};

type Responder = dyn Fn(&GenerationRequest) -> Result<String, TransportError> + Send + Sync;

/// Stub transport (no real API calls). Replies are computed from the
/// request so a test can answer per step and for the critic separately.
pub struct StubTransport {
    respond: Box<Responder>,
    delay: Duration,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl StubTransport {
    pub fn new(
        respond: impl Fn(&GenerationRequest) -> Result<String, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::with_delay(Duration::ZERO, respond)
    }

    pub fn with_delay(
        delay: Duration,
        respond: impl Fn(&GenerationRequest) -> Result<String, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            delay,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationTransport for StubTransport {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.respond)(&request)
    }
}

/// Whether `request` is a critic call rather than a step generation.
pub fn is_critic(request: &GenerationRequest) -> bool {
    request
        .turns
        .first()
        .is_some_and(|t| t.content.contains("strict reviewer"))
}

pub fn step_of(request: &GenerationRequest) -> &str {
    request.metadata.workflow_step_id.as_deref().unwrap_or("")
}

/// Engine config with near-instant reveals and a short draft debounce.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        reveal_chunk_chars: 64,
        reveal_tick: Duration::from_millis(1),
        paragraph_pause: Duration::from_millis(1),
        draft_debounce: Duration::from_millis(20),
        ..EngineConfig::default()
    }
}

/// Every event currently buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
