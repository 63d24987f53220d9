//! Events emitted to the host while a workflow runs.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::handoff::PayloadKind;
use crate::workflow::{CollectedData, InstanceStatus, WorkflowInstance};

/// Default broadcast channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Session events, fanned out over a broadcast channel. Sending never
/// requires a subscriber.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A step transition was applied.
    StepCompleted {
        step_id: String,
        next_step_id: Option<String>,
        instance: WorkflowInstance,
    },
    /// The instance moved between `in_progress` and `completed`.
    WorkflowStatusChanged {
        instance_id: Uuid,
        status: InstanceStatus,
        outcome: Option<CollectedData>,
    },
    /// A structured payload is pending confirmation.
    PayloadReady {
        step_id: String,
        kind: PayloadKind,
        payload: Value,
        replaced_by_fallback: bool,
    },
    /// Generation is blocked until the host clears quota suppression.
    QuotaExceeded {
        step_id: String,
        paywall_source: Option<String>,
        message: String,
    },
    /// A generation failed for any other reason.
    TransportError { step_id: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = SessionEvent::TransportError {
            step_id: "proposal".into(),
            message: "boom".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "transport_error");
        assert_eq!(json["step_id"], "proposal");
    }
}
