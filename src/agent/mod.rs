//! Agent invocation: context assembly, the generator call, and the events it
//! reports to the host.

pub mod context;
pub mod entitlements;
pub mod events;
pub mod orchestrator;

pub use entitlements::{Entitlements, Unmetered};
pub use events::{DEFAULT_EVENT_CAPACITY, SessionEvent};
pub use orchestrator::{AgentOrchestrator, GENERIC_ERROR_MESSAGE, InvocationOutcome, Reply, loading_message_id};
