//! Workflow definitions, registry and the instance state machine.
//!
//! A definition is an immutable step graph. Activating one creates a
//! `WorkflowInstance`; every `complete_step` call produces a new instance
//! with merged data and a resolved next step.

pub mod builtin;
pub mod definition;
pub mod state;

pub use builtin::builtin_registry;
pub use definition::{AgentBehavior, StaticRegistry, Step, StepType, WorkflowDefinition, WorkflowRegistry};
pub use state::{
    ActiveWorkflow, CollectedData, InstanceStatus, StepTransition, WorkflowInstance,
    WorkflowMachine, complete_step,
};
