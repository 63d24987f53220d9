//! WorkflowSession: one active workflow, its transcript and its agent.
//!
//! The session is what a host talks to. It routes user input to the state
//! machine or the orchestrator depending on the current step, keeps the
//! draft slot in sync for definitions that persist one, and reports
//! progress through [`SessionEvent`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};

use crate::agent::{
    AgentOrchestrator, DEFAULT_EVENT_CAPACITY, Entitlements, InvocationOutcome, SessionEvent,
};
use crate::config::EngineConfig;
use crate::error::{Result, WorkflowError};
use crate::handoff::{PayloadKind, PendingPayloads};
use crate::llm::GenerationTransport;
use crate::transcript::draft::{self, DraftPersister, DraftStore, draft_key};
use crate::transcript::{RevealConfig, Timeline};
use crate::workflow::{
    CollectedData, InstanceStatus, Step, StepTransition, StepType, WorkflowInstance,
    WorkflowMachine, WorkflowRegistry,
};

/// Serializable view of the active workflow.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatus {
    pub mode: String,
    pub definition_id: String,
    pub instance: WorkflowInstance,
    pub current_step: Option<Step>,
    pub quota_suppressed: bool,
}

/// Draft slot bound to the active definition.
struct DraftSlot {
    key: String,
    persister: DraftPersister,
}

/// Host-facing session around one workflow at a time.
pub struct WorkflowSession {
    config: EngineConfig,
    registry: Arc<dyn WorkflowRegistry>,
    machine: Arc<RwLock<WorkflowMachine>>,
    timeline: Arc<Timeline>,
    pending: Arc<Mutex<PendingPayloads>>,
    orchestrator: AgentOrchestrator,
    drafts: Option<Arc<dyn DraftStore>>,
    draft_slot: Mutex<Option<DraftSlot>>,
    rehydrated: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl WorkflowSession {
    pub fn new(
        registry: Arc<dyn WorkflowRegistry>,
        transport: Arc<dyn GenerationTransport>,
        config: EngineConfig,
    ) -> Self {
        let (events, _rx) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        let machine = Arc::new(RwLock::new(WorkflowMachine::new()));
        let timeline = Timeline::new(RevealConfig::from(&config));
        let pending = Arc::new(Mutex::new(PendingPayloads::new()));
        let orchestrator = AgentOrchestrator::new(
            Arc::clone(&machine),
            Arc::clone(&timeline),
            Arc::clone(&pending),
            transport,
            events.clone(),
            &config,
        );

        Self {
            config,
            registry,
            machine,
            timeline,
            pending,
            orchestrator,
            drafts: None,
            draft_slot: Mutex::new(None),
            rehydrated: AtomicBool::new(false),
            events,
        }
    }

    /// Persist transcripts of definitions that opt into drafts.
    pub fn with_draft_store(mut self, store: Arc<dyn DraftStore>) -> Self {
        self.drafts = Some(store);
        self
    }

    pub fn with_entitlements(mut self, entitlements: Arc<dyn Entitlements>) -> Self {
        self.orchestrator = self.orchestrator.with_entitlements(entitlements);
        self
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    pub fn orchestrator(&self) -> &AgentOrchestrator {
        &self.orchestrator
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Start the workflow registered for `mode`, replacing any active one.
    ///
    /// Returns `true` when a saved draft was restored; the opening generation
    /// is then skipped by [`bootstrap`](Self::bootstrap).
    pub async fn activate(&self, mode: &str) -> Result<bool> {
        let definition = self
            .registry
            .definition(mode)
            .ok_or_else(|| WorkflowError::UnknownMode(mode.to_string()))?;

        self.teardown().await;
        self.timeline.clear().await;
        self.machine.write().await.activate(Arc::clone(&definition));

        let mut rehydrated = false;
        if let (true, Some(store)) = (definition.persist_draft, self.drafts.as_ref()) {
            let key = draft_key(&definition.chat_mode);
            rehydrated = draft::rehydrate(store.as_ref(), &key, &self.timeline).await;
            let persister = DraftPersister::spawn(
                Arc::clone(store),
                key.clone(),
                &self.timeline,
                self.config.draft_debounce,
            );
            *self.draft_slot.lock().await = Some(DraftSlot { key, persister });
        }
        self.rehydrated.store(rehydrated, Ordering::SeqCst);

        info!(mode = mode, definition_id = %definition.id, rehydrated, "Workflow session activated");
        Ok(rehydrated)
    }

    /// Run the opening generation when the first step generates and no draft
    /// was restored.
    pub async fn bootstrap(&self) -> InvocationOutcome {
        if self.rehydrated.load(Ordering::SeqCst) {
            debug!("Skipping bootstrap: transcript restored from draft");
            return InvocationOutcome::Skipped;
        }
        let step = self.machine.read().await.current_step().cloned();
        match step {
            Some(step) if step.step_type == StepType::AgentGenerate => {
                self.run_agent_step(&step.id).await
            }
            _ => InvocationOutcome::Skipped,
        }
    }

    /// Handle one line of user input.
    ///
    /// On a `user_input` step the text is collected under the step's answer
    /// key and the workflow advances; on an `agent_generate` step the text is
    /// a refinement and the step is generated again.
    pub async fn submit_user_input(&self, text: &str) -> Result<InvocationOutcome> {
        let text = text.trim();
        let step = {
            let machine = self.machine.read().await;
            if machine.active().is_none() {
                return Err(WorkflowError::NotActive.into());
            }
            machine.current_step().cloned()
        };
        if text.is_empty() {
            return Ok(InvocationOutcome::Skipped);
        }

        self.timeline.append_user_message(text).await;
        self.timeline.set_pending_input("").await;

        let Some(step) = step else {
            debug!("User input after the last step; nothing to advance");
            return Ok(InvocationOutcome::Skipped);
        };

        let outcome = match step.step_type {
            StepType::UserInput => {
                let mut answer = CollectedData::new();
                answer.insert(step.answer_key().to_string(), Value::String(text.to_string()));
                self.complete_step(&step.id, Some(&answer), None).await;
                self.run_current_agent_step().await
            }
            StepType::AgentGenerate => self.run_agent_step(&step.id).await,
            StepType::Terminal => InvocationOutcome::Skipped,
        };
        Ok(outcome)
    }

    /// Apply a step completion and report it.
    pub async fn complete_step(
        &self,
        step_id: &str,
        collected: Option<&CollectedData>,
        next_override: Option<&str>,
    ) -> Option<StepTransition> {
        let transition = self
            .machine
            .write()
            .await
            .complete_step(step_id, collected, next_override)?;

        self.emit(SessionEvent::StepCompleted {
            step_id: transition.step_id.clone(),
            next_step_id: transition.next_step_id().map(str::to_string),
            instance: transition.instance.clone(),
        });

        if transition.status_changed() {
            self.emit(SessionEvent::WorkflowStatusChanged {
                instance_id: transition.instance.id,
                status: transition.instance.status,
                outcome: transition.instance.outcome.clone(),
            });
            if transition.instance.status == InstanceStatus::Completed {
                self.discard_draft().await;
            }
        }
        Some(transition)
    }

    /// Accept the pending payload of `kind`.
    ///
    /// The payload is merged into collected data under the kind's key and the
    /// current step is completed. When that lands on a terminal step of an
    /// auto-completing definition, the terminal step is completed too. The
    /// value is returned for the host to commit to its own store.
    pub async fn confirm_payload(&self, kind: PayloadKind) -> Option<Value> {
        let value = self.pending.lock().await.take(kind)?;

        let (step_id, auto_complete) = {
            let machine = self.machine.read().await;
            let Some(active) = machine.active() else {
                warn!(kind = %kind, "Payload confirmed with no active workflow");
                return Some(value);
            };
            (
                active.instance.current_step_id.clone(),
                active.definition.auto_complete,
            )
        };
        let Some(step_id) = step_id else {
            debug!(kind = %kind, "Payload confirmed after the last step");
            return Some(value);
        };

        let mut data = CollectedData::new();
        data.insert(kind.key().to_string(), value.clone());
        info!(kind = %kind, step_id = %step_id, "Payload confirmed");
        self.complete_step(&step_id, Some(&data), None).await;

        if auto_complete {
            let terminal = self
                .machine
                .read()
                .await
                .current_step()
                .filter(|s| s.step_type == StepType::Terminal)
                .map(|s| s.id.clone());
            if let Some(terminal_id) = terminal {
                self.complete_step(&terminal_id, None, None).await;
            }
        }
        Some(value)
    }

    /// Invoke the generator for `step_id` directly.
    pub async fn invoke_agent_step(&self, step_id: &str) -> InvocationOutcome {
        self.orchestrator.invoke_agent_step(step_id).await
    }

    async fn run_current_agent_step(&self) -> InvocationOutcome {
        let step = self.machine.read().await.current_step().cloned();
        match step {
            Some(step) if step.step_type == StepType::AgentGenerate => {
                self.run_agent_step(&step.id).await
            }
            _ => InvocationOutcome::Skipped,
        }
    }

    /// Generate `step_id`. A step that expects no payload advances as soon as
    /// its reply is delivered; one that does waits for confirmation.
    async fn run_agent_step(&self, step_id: &str) -> InvocationOutcome {
        let mut step_id = step_id.to_string();
        loop {
            let outcome = self.orchestrator.invoke_agent_step(&step_id).await;
            if !outcome.is_replied() {
                return outcome;
            }

            let expects_payload = {
                let machine = self.machine.read().await;
                machine
                    .definition()
                    .and_then(|d| d.step(&step_id))
                    .is_some_and(|s| s.handoff.is_some())
            };
            if expects_payload {
                return outcome;
            }

            let next = self
                .complete_step(&step_id, None, None)
                .await
                .and_then(|t| t.next_step_id().map(str::to_string));
            let next_generates = match next.as_deref() {
                Some(next_id) => self
                    .machine
                    .read()
                    .await
                    .definition()
                    .and_then(|d| d.step(next_id))
                    .is_some_and(|s| s.step_type == StepType::AgentGenerate),
                None => false,
            };
            match next {
                Some(next_id) if next_generates => step_id = next_id,
                _ => return outcome,
            }
        }
    }

    /// Jump every running reveal to its full text.
    pub async fn skip_reveals(&self) {
        self.timeline.skip_active_reveals().await;
    }

    pub async fn set_pending_input(&self, input: &str) {
        self.timeline.set_pending_input(input).await;
    }

    pub async fn set_launch_context(&self, summary: Option<String>) {
        self.orchestrator.set_launch_context(summary).await;
    }

    pub fn clear_quota_suppression(&self) {
        self.orchestrator.clear_quota_suppression();
    }

    /// Snapshot of the active workflow, if any.
    pub async fn status(&self) -> Option<WorkflowStatus> {
        let machine = self.machine.read().await;
        let active = machine.active()?;
        Some(WorkflowStatus {
            mode: active.definition.chat_mode.clone(),
            definition_id: active.definition.id.clone(),
            instance: active.instance.clone(),
            current_step: active.current_step().cloned(),
            quota_suppressed: self.orchestrator.is_quota_suppressed(),
        })
    }

    pub async fn is_active(&self) -> bool {
        self.machine.read().await.active().is_some()
    }

    pub async fn pending_payload(&self, kind: PayloadKind) -> Option<Value> {
        self.pending.lock().await.get(kind).cloned()
    }

    pub async fn pending_payloads(&self) -> Map<String, Value> {
        self.pending.lock().await.to_json()
    }

    /// End the active workflow. Running reveals stop where they are and the
    /// draft persister stops without a final write.
    pub async fn deactivate(&self) {
        self.teardown().await;
        info!("Workflow session deactivated");
    }

    async fn teardown(&self) {
        self.timeline.cancel_reveals();
        if let Some(slot) = self.draft_slot.lock().await.take() {
            slot.persister.stop();
        }
        self.machine.write().await.deactivate();
        self.pending.lock().await.clear();
        self.rehydrated.store(false, Ordering::SeqCst);
    }

    /// Stop persisting and clear the slot of a finished workflow.
    async fn discard_draft(&self) {
        let Some(slot) = self.draft_slot.lock().await.take() else {
            return;
        };
        slot.persister.stop();
        if let Some(store) = self.drafts.as_ref() {
            match store.delete(&slot.key).await {
                Ok(_) => debug!(key = %slot.key, "Draft cleared after completion"),
                Err(e) => warn!(key = %slot.key, error = %e, "Failed to clear draft"),
            }
        }
    }
}
