//! Workflow instance state machine.
//!
//! States are the step ids of the active definition plus a terminal "no
//! current step" state. Transitions are pure: [`complete_step`] takes the
//! current instance and returns a new one with `revision` bumped, so a host
//! can tell a transition happened by comparing revisions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::definition::{Step, WorkflowDefinition};

/// Collected answers, keyed by step or collect key.
pub type CollectedData = Map<String, Value>;

/// Lifecycle of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    InProgress,
    Completed,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Runtime record of progress through a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub definition_id: String,
    pub status: InstanceStatus,
    pub current_step_id: Option<String>,
    pub collected_data: CollectedData,
    pub outcome: Option<CollectedData>,
    /// Number of transitions applied so far.
    pub revision: u64,
}

impl WorkflowInstance {
    /// A fresh instance positioned at the definition's first step.
    pub fn start(definition: &WorkflowDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition_id: definition.id.clone(),
            status: InstanceStatus::InProgress,
            current_step_id: definition.first_step().map(|s| s.id.clone()),
            collected_data: CollectedData::new(),
            outcome: None,
            revision: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == InstanceStatus::Completed
    }
}

/// Apply one step completion.
///
/// Merges `collected` shallowly (last write wins), resolves the next step
/// as override > the step's static next > none, and completes the instance
/// when nothing follows and the definition auto-completes. The step id is
/// not checked against the current step.
pub fn complete_step(
    definition: &WorkflowDefinition,
    instance: &WorkflowInstance,
    step_id: &str,
    collected: Option<&CollectedData>,
    next_override: Option<&str>,
) -> WorkflowInstance {
    let mut next = instance.clone();
    next.revision = instance.revision + 1;

    if let Some(data) = collected {
        for (key, value) in data {
            next.collected_data.insert(key.clone(), value.clone());
        }
    }

    let resolved = next_override.map(String::from).or_else(|| {
        definition
            .step(step_id)
            .and_then(|s| s.next_step_id.clone())
    });

    match resolved {
        Some(next_id) => {
            if definition.step(&next_id).is_none() {
                warn!(
                    definition_id = %definition.id,
                    next_step_id = %next_id,
                    "Transition targets a step the definition does not declare"
                );
            }
            next.current_step_id = Some(next_id);
        }
        None => {
            next.current_step_id = None;
            if definition.auto_complete {
                next.status = InstanceStatus::Completed;
                next.outcome = Some(next.collected_data.clone());
            }
        }
    }

    next
}

/// The definition/instance pair owned by one active session.
#[derive(Debug, Clone)]
pub struct ActiveWorkflow {
    /// Correlation id for this activation; late async results compare it
    /// against the current one before applying.
    pub activation_id: Uuid,
    pub definition: Arc<WorkflowDefinition>,
    pub instance: WorkflowInstance,
}

impl ActiveWorkflow {
    pub fn current_step(&self) -> Option<&Step> {
        self.instance
            .current_step_id
            .as_deref()
            .and_then(|id| self.definition.step(id))
    }
}

/// Outcome of a step completion applied to the active workflow.
#[derive(Debug, Clone)]
pub struct StepTransition {
    pub step_id: String,
    pub previous_status: InstanceStatus,
    pub instance: WorkflowInstance,
}

impl StepTransition {
    pub fn status_changed(&self) -> bool {
        self.previous_status != self.instance.status
    }

    pub fn next_step_id(&self) -> Option<&str> {
        self.instance.current_step_id.as_deref()
    }
}

/// Holds at most one active workflow and applies transitions to it.
#[derive(Debug, Default)]
pub struct WorkflowMachine {
    active: Option<ActiveWorkflow>,
}

impl WorkflowMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new instance of `definition`, replacing any active one.
    pub fn activate(&mut self, definition: Arc<WorkflowDefinition>) -> &ActiveWorkflow {
        let instance = WorkflowInstance::start(&definition);
        info!(
            definition_id = %definition.id,
            instance_id = %instance.id,
            first_step = ?instance.current_step_id,
            "Workflow activated"
        );
        self.active.insert(ActiveWorkflow {
            activation_id: Uuid::new_v4(),
            definition,
            instance,
        })
    }

    /// Discard the active workflow, returning it.
    pub fn deactivate(&mut self) -> Option<ActiveWorkflow> {
        let previous = self.active.take();
        if let Some(ref active) = previous {
            info!(instance_id = %active.instance.id, "Workflow deactivated");
        }
        previous
    }

    pub fn active(&self) -> Option<&ActiveWorkflow> {
        self.active.as_ref()
    }

    pub fn activation_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|a| a.activation_id)
    }

    pub fn instance(&self) -> Option<&WorkflowInstance> {
        self.active.as_ref().map(|a| &a.instance)
    }

    pub fn definition(&self) -> Option<&Arc<WorkflowDefinition>> {
        self.active.as_ref().map(|a| &a.definition)
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.active.as_ref().and_then(ActiveWorkflow::current_step)
    }

    /// Complete `step_id`. Returns `None` when nothing is active.
    pub fn complete_step(
        &mut self,
        step_id: &str,
        collected: Option<&CollectedData>,
        next_override: Option<&str>,
    ) -> Option<StepTransition> {
        let Some(active) = self.active.as_mut() else {
            debug!(step_id = step_id, "complete_step ignored: no active workflow");
            return None;
        };

        let previous_status = active.instance.status;
        let instance = complete_step(
            &active.definition,
            &active.instance,
            step_id,
            collected,
            next_override,
        );
        info!(
            instance_id = %instance.id,
            step_id = step_id,
            next_step_id = ?instance.current_step_id,
            status = %instance.status,
            revision = instance.revision,
            "Step completed"
        );
        active.instance = instance.clone();

        Some(StepTransition {
            step_id: step_id.to_string(),
            previous_status,
            instance,
        })
    }
}
