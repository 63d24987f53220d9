//! Workflow definitions and the read-only registry that serves them.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::handoff::PayloadKind;

/// What a step does when it becomes current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Waits for the user to type or pick something.
    UserInput,
    /// Invokes the generator.
    AgentGenerate,
    /// Nothing left to do; the presenter decides what happens next.
    Terminal,
}

/// Presentation hints for generating steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBehavior {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading_message: Option<String>,
}

/// A node in a definition's step graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_hint: Option<String>,
    #[serde(default)]
    pub agent_behavior: AgentBehavior,
    #[serde(default)]
    pub hide_freeform_input: bool,
    /// Key under which a free-text answer to this step is collected.
    /// Defaults to the step id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect_key: Option<String>,
    /// Payload kind this step asks the generator for. Used to label bare
    /// JSON replies that carry no marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff: Option<PayloadKind>,
}

impl Step {
    fn new(id: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            step_type,
            next_step_id: None,
            prompt_template: None,
            validation_hint: None,
            agent_behavior: AgentBehavior::default(),
            hide_freeform_input: false,
            collect_key: None,
            handoff: None,
        }
    }

    pub fn user_input(id: impl Into<String>) -> Self {
        Self::new(id, StepType::UserInput)
    }

    pub fn agent_generate(id: impl Into<String>) -> Self {
        Self::new(id, StepType::AgentGenerate)
    }

    pub fn terminal(id: impl Into<String>) -> Self {
        Self::new(id, StepType::Terminal)
    }

    pub fn then(mut self, next: impl Into<String>) -> Self {
        self.next_step_id = Some(next.into());
        self
    }

    pub fn with_prompt(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }

    pub fn with_validation_hint(mut self, hint: impl Into<String>) -> Self {
        self.validation_hint = Some(hint.into());
        self
    }

    pub fn with_loading_message(mut self, message: impl Into<String>) -> Self {
        self.agent_behavior.loading_message = Some(message.into());
        self
    }

    pub fn hide_freeform(mut self) -> Self {
        self.hide_freeform_input = true;
        self
    }

    pub fn collect_as(mut self, key: impl Into<String>) -> Self {
        self.collect_key = Some(key.into());
        self
    }

    pub fn expects(mut self, kind: PayloadKind) -> Self {
        self.handoff = Some(kind);
        self
    }

    /// Key a free-text answer is stored under.
    pub fn answer_key(&self) -> &str {
        self.collect_key.as_deref().unwrap_or(&self.id)
    }
}

/// Immutable description of one guided flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub chat_mode: String,
    pub steps: Vec<Step>,
    /// Whether running off the end of the graph completes the instance.
    /// A definition that opts out leaves lifecycle control to its presenter.
    #[serde(default = "default_true")]
    pub auto_complete: bool,
    /// Whether the transcript is saved to the draft slot while active.
    #[serde(default)]
    pub persist_draft: bool,
}

fn default_true() -> bool {
    true
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, chat_mode: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            chat_mode: chat_mode.into(),
            steps,
            auto_complete: true,
            persist_draft: false,
        }
    }

    pub fn without_auto_complete(mut self) -> Self {
        self.auto_complete = false;
        self
    }

    pub fn with_draft(mut self) -> Self {
        self.persist_draft = true;
        self
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// The initial step, if the definition has any.
    pub fn first_step(&self) -> Option<&Step> {
        self.steps.first()
    }
}

/// Read-only lookup of chat mode → definition.
pub trait WorkflowRegistry: Send + Sync {
    fn definition(&self, mode: &str) -> Option<Arc<WorkflowDefinition>>;
}

/// Registry backed by a fixed map.
#[derive(Debug, Default, Clone)]
pub struct StaticRegistry {
    definitions: HashMap<String, Arc<WorkflowDefinition>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under its chat mode. Later registrations for the
    /// same mode replace earlier ones.
    pub fn with(mut self, definition: WorkflowDefinition) -> Self {
        self.definitions
            .insert(definition.chat_mode.clone(), Arc::new(definition));
        self
    }

    pub fn modes(&self) -> Vec<&str> {
        let mut modes: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        modes.sort_unstable();
        modes
    }
}

impl WorkflowRegistry for StaticRegistry {
    fn definition(&self, mode: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.get(mode).cloned()
    }
}
