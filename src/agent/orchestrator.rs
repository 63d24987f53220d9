//! Agent invocation for `agent_generate` steps.
//!
//! One invocation assembles context from the transcript and collected data,
//! calls the transport, splits the reply into prose and payload, optionally
//! runs the quality gate, and reveals the prose. Every failure ends here:
//! quota exhaustion suppresses further generation, anything else leaves a
//! fixed apology in the transcript.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::TransportError;
use crate::handoff::{PayloadKind, PendingPayloads, parse_reply};
use crate::llm::{GenerationRequest, GenerationTransport, RequestMetadata, Role, is_quota_exceeded};
use crate::quality::QualityGate;
use crate::transcript::message::new_message_id;
use crate::transcript::{RevealHandle, Timeline};
use crate::workflow::{CollectedData, Step, WorkflowDefinition, WorkflowMachine};

use super::context::build_turns;
use super::entitlements::{Entitlements, Unmetered};
use super::events::SessionEvent;

/// Assistant message appended when generation fails for a non-quota reason.
pub const GENERIC_ERROR_MESSAGE: &str =
    "Sorry, I ran into a problem putting that together. Please try again in a moment.";

/// Id of the loading indicator shown while `step_id` generates.
pub fn loading_message_id(step_id: &str) -> String {
    format!("loading:{step_id}")
}

/// Result of one `invoke_agent_step` call.
#[derive(Debug)]
pub enum InvocationOutcome {
    /// No active workflow, or the step is not part of it.
    Skipped,
    /// A call for the same step is still running.
    AlreadyInFlight,
    /// The workflow was replaced while the call ran; the result was dropped.
    Stale,
    /// Generation is blocked by quota or entitlements.
    QuotaExceeded,
    /// The transport failed; the apology message was appended.
    Failed { error: String },
    /// The reply was delivered.
    Replied(Reply),
}

/// What a successful invocation produced.
#[derive(Debug)]
pub struct Reply {
    /// Reveal of the visible prose, when there was any.
    pub reveal: Option<RevealHandle>,
    /// Kind of payload stored as pending, if any.
    pub payload_kind: Option<PayloadKind>,
    pub replaced_by_fallback: bool,
}

impl InvocationOutcome {
    pub fn is_replied(&self) -> bool {
        matches!(self, Self::Replied(_))
    }

    pub fn reply(&self) -> Option<&Reply> {
        match self {
            Self::Replied(reply) => Some(reply),
            _ => None,
        }
    }
}

/// Removes a step id from the in-flight set when dropped.
struct InFlightGuard<'a> {
    set: &'a StdMutex<HashSet<String>>,
    step_id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a StdMutex<HashSet<String>>, step_id: &str) -> Option<Self> {
        let mut in_flight = set.lock().ok()?;
        if !in_flight.insert(step_id.to_string()) {
            return None;
        }
        Some(Self {
            set,
            step_id: step_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.set.lock() {
            in_flight.remove(&self.step_id);
        }
    }
}

/// Snapshot of the active workflow taken when an invocation starts.
struct CallContext {
    activation_id: Uuid,
    /// Instance revision at call time; any transition since makes the
    /// result stale.
    revision: u64,
    definition: Arc<WorkflowDefinition>,
    instance_id: Uuid,
    collected: CollectedData,
    step: Step,
}

/// Runs generator calls for the steps of the active workflow.
pub struct AgentOrchestrator {
    machine: Arc<RwLock<WorkflowMachine>>,
    timeline: Arc<Timeline>,
    pending: Arc<Mutex<PendingPayloads>>,
    transport: Arc<dyn GenerationTransport>,
    quality: QualityGate,
    entitlements: Arc<dyn Entitlements>,
    events: broadcast::Sender<SessionEvent>,
    transport_timeout: Duration,
    launch_context: RwLock<Option<String>>,
    in_flight: StdMutex<HashSet<String>>,
    quota_suppressed: AtomicBool,
}

impl AgentOrchestrator {
    pub fn new(
        machine: Arc<RwLock<WorkflowMachine>>,
        timeline: Arc<Timeline>,
        pending: Arc<Mutex<PendingPayloads>>,
        transport: Arc<dyn GenerationTransport>,
        events: broadcast::Sender<SessionEvent>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            machine,
            timeline,
            pending,
            quality: QualityGate::from_config(Arc::clone(&transport), config),
            transport,
            entitlements: Arc::new(Unmetered),
            events,
            transport_timeout: config.transport_timeout,
            launch_context: RwLock::new(None),
            in_flight: StdMutex::new(HashSet::new()),
            quota_suppressed: AtomicBool::new(false),
        }
    }

    pub fn with_entitlements(mut self, entitlements: Arc<dyn Entitlements>) -> Self {
        self.entitlements = entitlements;
        self
    }

    /// Summary of where the user launched the workflow from, sent as request
    /// metadata.
    pub async fn set_launch_context(&self, summary: Option<String>) {
        *self.launch_context.write().await = summary;
    }

    pub fn is_quota_suppressed(&self) -> bool {
        self.quota_suppressed.load(Ordering::SeqCst)
    }

    /// Allow generation again after the host resolved a quota block.
    pub fn clear_quota_suppression(&self) {
        if self.quota_suppressed.swap(false, Ordering::SeqCst) {
            info!("Quota suppression cleared");
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Ok if no host is listening.
        let _ = self.events.send(event);
    }

    async fn call_context(&self, step_id: &str) -> Option<CallContext> {
        let machine = self.machine.read().await;
        let Some(active) = machine.active() else {
            debug!(step_id = step_id, "invoke_agent_step ignored: no active workflow");
            return None;
        };
        let Some(step) = active.definition.step(step_id) else {
            warn!(
                step_id = step_id,
                definition_id = %active.definition.id,
                "invoke_agent_step ignored: unknown step"
            );
            return None;
        };
        Some(CallContext {
            activation_id: active.activation_id,
            revision: active.instance.revision,
            definition: Arc::clone(&active.definition),
            instance_id: active.instance.id,
            collected: active.instance.collected_data.clone(),
            step: step.clone(),
        })
    }

    /// Whether the workflow was replaced, or its instance moved on, since
    /// `ctx` was captured.
    async fn is_stale(&self, ctx: &CallContext) -> bool {
        let machine = self.machine.read().await;
        match machine.active() {
            Some(active) => {
                active.activation_id != ctx.activation_id
                    || active.instance.revision != ctx.revision
            }
            None => true,
        }
    }

    /// Run the generator for `step_id` of the active workflow.
    pub async fn invoke_agent_step(&self, step_id: &str) -> InvocationOutcome {
        let Some(ctx) = self.call_context(step_id).await else {
            return InvocationOutcome::Skipped;
        };

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, step_id) else {
            debug!(step_id = step_id, "Agent call already in flight");
            return InvocationOutcome::AlreadyInFlight;
        };

        if self.is_quota_suppressed() || !self.entitlements.can_generate() {
            info!(step_id = step_id, "Generation blocked by quota");
            self.emit(SessionEvent::QuotaExceeded {
                step_id: step_id.to_string(),
                paywall_source: self.entitlements.paywall_source(),
                message: "Generation is not available right now".into(),
            });
            return InvocationOutcome::QuotaExceeded;
        }

        let history = self.timeline.history().await;
        let turns = build_turns(history, &ctx.collected, &ctx.step);
        let metadata = RequestMetadata {
            mode: ctx.definition.chat_mode.clone(),
            workflow_definition_id: Some(ctx.definition.id.clone()),
            workflow_instance_id: Some(ctx.instance_id.to_string()),
            workflow_step_id: Some(step_id.to_string()),
            launch_context_summary: self.launch_context.read().await.clone(),
            paywall_source: self.entitlements.paywall_source(),
        };

        let loading_id = match ctx.step.agent_behavior.loading_message.as_deref() {
            Some(message) => {
                let id = loading_message_id(step_id);
                self.timeline
                    .push_message(id.clone(), Role::Assistant, message)
                    .await;
                Some(id)
            }
            None => None,
        };

        info!(
            step_id = step_id,
            transport = self.transport.name(),
            turns = turns.len(),
            "Invoking agent step"
        );
        let result = match tokio::time::timeout(
            self.transport_timeout,
            self.transport
                .generate(GenerationRequest::new(turns, metadata.clone())),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                transport: self.transport.name().to_string(),
                timeout: self.transport_timeout,
            }),
        };

        if let Some(id) = loading_id {
            self.timeline.remove_message(&id).await;
        }

        if self.is_stale(&ctx).await {
            debug!(step_id = step_id, "Dropping agent result for a superseded instance");
            return InvocationOutcome::Stale;
        }

        match result {
            Ok(raw) => self.deliver(&ctx, &metadata, &raw).await,
            Err(e) if is_quota_exceeded(&e) => {
                self.quota_suppressed.store(true, Ordering::SeqCst);
                warn!(step_id = step_id, error = %e, "Generation quota exceeded");
                self.emit(SessionEvent::QuotaExceeded {
                    step_id: step_id.to_string(),
                    paywall_source: self.entitlements.paywall_source(),
                    message: e.to_string(),
                });
                InvocationOutcome::QuotaExceeded
            }
            Err(e) => {
                error!(step_id = step_id, error = %e, "Agent step failed");
                self.timeline
                    .append_assistant_message(GENERIC_ERROR_MESSAGE)
                    .await;
                self.emit(SessionEvent::TransportError {
                    step_id: step_id.to_string(),
                    message: e.to_string(),
                });
                InvocationOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn deliver(&self, ctx: &CallContext, metadata: &RequestMetadata, raw: &str) -> InvocationOutcome {
        let step_id = ctx.step.id.as_str();
        let parsed = parse_reply(raw);
        let mut visible = parsed.visible;
        let mut payload_kind = None;
        let mut replaced_by_fallback = false;

        if let Some(handoff) = parsed.payload {
            match handoff.kind.or(ctx.step.handoff) {
                Some(kind) => {
                    let mut value = handoff.value;
                    if kind == PayloadKind::ArcProposal {
                        let decision = self.quality.review(&value, &ctx.collected, metadata).await;
                        replaced_by_fallback = decision.replaced();
                        value = decision.into_payload(value);
                        if self.is_stale(ctx).await {
                            debug!(step_id = step_id, "Dropping reviewed payload for a superseded instance");
                            return InvocationOutcome::Stale;
                        }
                    }

                    self.pending.lock().await.insert(kind, value.clone());
                    info!(
                        step_id = step_id,
                        kind = %kind,
                        replaced_by_fallback,
                        "Payload ready for confirmation"
                    );
                    self.emit(SessionEvent::PayloadReady {
                        step_id: step_id.to_string(),
                        kind,
                        payload: value,
                        replaced_by_fallback,
                    });
                    payload_kind = Some(kind);
                }
                None => {
                    // Unlabelled JSON on a step that expects no payload is shown verbatim.
                    debug!(step_id = step_id, "Bare JSON reply with no expected payload, showing as prose");
                    visible = raw.to_string();
                }
            }
        }

        let reveal = if visible.trim().is_empty() {
            None
        } else {
            Some(
                self.timeline
                    .stream_assistant_reply(visible, new_message_id("assistant"), None)
                    .await,
            )
        };

        InvocationOutcome::Replied(Reply {
            reveal,
            payload_kind,
            replaced_by_fallback,
        })
    }
}
