//! Transcript: the message log, progressive reveal of replies, and draft
//! persistence.

pub mod draft;
pub mod message;
pub mod reveal;
pub mod timeline;

pub use draft::{Draft, DraftPersister, DraftStore, LibSqlDraftStore, MemoryDraftStore, draft_key};
pub use message::{ChatMessage, TimelineEntry};
pub use reveal::{OnDone, RevealConfig, RevealHandle, RevealStatus};
pub use timeline::Timeline;
