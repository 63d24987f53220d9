//! Draft persistence: one slot per workflow kind holding the in-progress
//! transcript and the unsent input.
//!
//! Writes are debounced off the timeline's change counter. Store failures
//! are logged and swallowed; a lost draft never interrupts the chat.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::DraftError;

use super::message::ChatMessage;
use super::timeline::Timeline;

/// Persisted state of an unfinished conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub messages: Vec<ChatMessage>,
    pub pending_input: String,
    pub updated_at: DateTime<Utc>,
}

impl Draft {
    /// At least one visible message, or unsent input that isn't blank.
    pub fn is_meaningful(&self) -> bool {
        self.messages.iter().any(ChatMessage::is_visible) || !self.pending_input.trim().is_empty()
    }
}

/// Storage slot key for a chat mode.
pub fn draft_key(mode: &str) -> String {
    format!("draft:{mode}")
}

/// Key-value storage for drafts.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Draft>, DraftError>;

    /// Overwrite the slot wholesale.
    async fn save(&self, key: &str, draft: &Draft) -> Result<(), DraftError>;

    /// Returns whether a draft was removed.
    async fn delete(&self, key: &str) -> Result<bool, DraftError>;
}

/// Process-local draft store.
#[derive(Default)]
pub struct MemoryDraftStore {
    slots: RwLock<HashMap<String, Draft>>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn load(&self, key: &str) -> Result<Option<Draft>, DraftError> {
        Ok(self.slots.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, draft: &Draft) -> Result<(), DraftError> {
        self.slots
            .write()
            .await
            .insert(key.to_string(), draft.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, DraftError> {
        Ok(self.slots.write().await.remove(key).is_some())
    }
}

/// Drafts kept in a libSQL `drafts` table, one row per key.
pub struct LibSqlDraftStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlDraftStore {
    /// Open (or create) a local database file and ensure the table exists.
    pub async fn new_local(path: &Path) -> Result<Self, DraftError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DraftError::Open(format!("Failed to create draft directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DraftError::Open(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db)?;
        store.init_schema().await?;
        info!(path = %path.display(), "Draft store opened");
        Ok(store)
    }

    /// In-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DraftError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DraftError::Open(format!("Failed to create in-memory database: {e}")))?;

        let store = Self::from_database(db)?;
        store.init_schema().await?;
        Ok(store)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DraftError> {
        let conn = db
            .connect()
            .map_err(|e| DraftError::Open(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    async fn init_schema(&self) -> Result<(), DraftError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS drafts (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );",
            )
            .await
            .map_err(|e| DraftError::Query(format!("init_schema: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl DraftStore for LibSqlDraftStore {
    async fn load(&self, key: &str) -> Result<Option<Draft>, DraftError> {
        let mut rows = self
            .conn
            .query("SELECT value FROM drafts WHERE key = ?1", params![key])
            .await
            .map_err(|e| DraftError::Query(format!("load_draft: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value: String = row
                    .get(0)
                    .map_err(|e| DraftError::Query(format!("load_draft row parse: {e}")))?;
                let draft = serde_json::from_str(&value)
                    .map_err(|e| DraftError::Serialization(format!("load_draft: {e}")))?;
                Ok(Some(draft))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DraftError::Query(format!("load_draft: {e}"))),
        }
    }

    async fn save(&self, key: &str, draft: &Draft) -> Result<(), DraftError> {
        let value = serde_json::to_string(draft)
            .map_err(|e| DraftError::Serialization(format!("save_draft: {e}")))?;
        self.conn
            .execute(
                "INSERT INTO drafts (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (key) DO UPDATE SET value = ?2, updated_at = ?3",
                params![key, value, draft.updated_at.to_rfc3339()],
            )
            .await
            .map_err(|e| DraftError::Query(format!("save_draft: {e}")))?;
        debug!(key = key, messages = draft.messages.len(), "Draft saved");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, DraftError> {
        let count = self
            .conn
            .execute("DELETE FROM drafts WHERE key = ?1", params![key])
            .await
            .map_err(|e| DraftError::Query(format!("delete_draft: {e}")))?;
        Ok(count > 0)
    }
}

/// Write the timeline's current state to `key`, or clear the slot when there
/// is nothing worth keeping.
pub async fn persist_snapshot(store: &dyn DraftStore, key: &str, timeline: &Timeline) {
    let (messages, pending_input) = timeline.snapshot().await;
    let draft = Draft {
        messages,
        pending_input,
        updated_at: Utc::now(),
    };

    let result = if draft.is_meaningful() {
        store.save(key, &draft).await
    } else {
        store.delete(key).await.map(|_| ())
    };
    if let Err(e) = result {
        warn!(key = key, error = %e, "Failed to persist draft");
    }
}

/// Restore a saved draft into `timeline`. Returns `true` when a meaningful
/// draft was restored; an empty one is deleted.
pub async fn rehydrate(store: &dyn DraftStore, key: &str, timeline: &Timeline) -> bool {
    match store.load(key).await {
        Ok(Some(draft)) if draft.is_meaningful() => {
            info!(key = key, messages = draft.messages.len(), "Rehydrating draft");
            timeline.restore(draft.messages, draft.pending_input).await;
            true
        }
        Ok(Some(_)) => {
            if let Err(e) = store.delete(key).await {
                warn!(key = key, error = %e, "Failed to delete empty draft");
            }
            false
        }
        Ok(None) => false,
        Err(e) => {
            warn!(key = key, error = %e, "Failed to load draft");
            false
        }
    }
}

/// Background writer that saves the timeline after each quiet period.
pub struct DraftPersister {
    store: Arc<dyn DraftStore>,
    key: String,
    timeline: Weak<Timeline>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DraftPersister {
    pub fn spawn(
        store: Arc<dyn DraftStore>,
        key: impl Into<String>,
        timeline: &Arc<Timeline>,
        debounce: Duration,
    ) -> Self {
        let key = key.into();
        let mut changes = timeline.subscribe_changes();
        changes.borrow_and_update();

        let task = {
            let store = Arc::clone(&store);
            let key = key.clone();
            let timeline = Arc::downgrade(timeline);
            tokio::spawn(async move {
                loop {
                    if changes.changed().await.is_err() {
                        return;
                    }
                    // Wait until the timeline has been quiet for `debounce`.
                    loop {
                        match tokio::time::timeout(debounce, changes.changed()).await {
                            Ok(Ok(())) => continue,
                            Ok(Err(_)) => return,
                            Err(_) => break,
                        }
                    }
                    let Some(timeline) = timeline.upgrade() else {
                        return;
                    };
                    persist_snapshot(store.as_ref(), &key, &timeline).await;
                }
            })
        };

        debug!(key = %key, debounce_ms = debounce.as_millis() as u64, "Draft persister started");
        Self {
            store,
            key,
            timeline: Arc::downgrade(timeline),
            task: Mutex::new(Some(task)),
        }
    }

    /// Persist immediately, bypassing the debounce.
    pub async fn flush(&self) {
        if let Some(timeline) = self.timeline.upgrade() {
            persist_snapshot(self.store.as_ref(), &self.key, &timeline).await;
        }
    }

    /// Stop watching; pending debounced writes are dropped.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().ok().and_then(|mut slot| slot.take()) {
            task.abort();
        }
    }
}

impl Drop for DraftPersister {
    fn drop(&mut self) {
        self.stop();
    }
}
