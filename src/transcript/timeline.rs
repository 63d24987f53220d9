//! Transcript timeline controller.
//!
//! Owns the message log shared by user input, hidden system context and
//! generator replies. The log is append-only except for content growth
//! during a reveal and in-place replacement of messages pushed under a
//! stable id (loading indicators). Every mutation bumps a change counter
//! that the draft persister watches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{RwLock, watch};
use tracing::debug;

use crate::llm::{ChatTurn, Role};

use super::message::{ChatMessage, TimelineEntry};
use super::reveal::{
    OnDone, RevealConfig, RevealControl, RevealHandle, RevealSchedule, RevealStatus, run_reveal,
};

struct Entry {
    index: u64,
    message: ChatMessage,
}

#[derive(Default)]
struct TimelineState {
    entries: Vec<Entry>,
    next_index: u64,
    pending_input: String,
}

impl TimelineState {
    fn upsert(&mut self, message: ChatMessage) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.message.id == message.id) {
            entry.message.role = message.role;
            entry.message.content = message.content;
            return;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.entries.push(Entry { index, message });
    }

    fn set_content(&mut self, id: &str, content: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.message.id == id) {
            Some(entry) => {
                entry.message.content.clear();
                entry.message.content.push_str(content);
                true
            }
            None => false,
        }
    }
}

/// The shared message timeline of one workflow session.
pub struct Timeline {
    state: RwLock<TimelineState>,
    reveal_config: RevealConfig,
    reveals: Mutex<Vec<RevealHandle>>,
    changes: watch::Sender<u64>,
}

impl Timeline {
    pub fn new(reveal_config: RevealConfig) -> Arc<Self> {
        let (changes, _) = watch::channel(0);
        Arc::new(Self {
            state: RwLock::new(TimelineState::default()),
            reveal_config,
            reveals: Mutex::new(Vec::new()),
            changes,
        })
    }

    fn notify_change(&self) {
        self.changes.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Receiver that observes every message-list or pending-input mutation.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Append a user message. Returns its id.
    pub async fn append_user_message(&self, content: impl Into<String>) -> String {
        let message = ChatMessage::user(content);
        let id = message.id.clone();
        self.state.write().await.upsert(message);
        self.notify_change();
        id
    }

    /// Append a hidden system message. Returns its id.
    pub async fn append_system_message(&self, content: impl Into<String>) -> String {
        let message = ChatMessage::system(content);
        let id = message.id.clone();
        self.state.write().await.upsert(message);
        self.notify_change();
        id
    }

    /// Append a fully-formed assistant message without revealing it.
    pub async fn append_assistant_message(&self, content: impl Into<String>) -> String {
        let message = ChatMessage::assistant(content);
        let id = message.id.clone();
        self.state.write().await.upsert(message);
        self.notify_change();
        id
    }

    /// Append a message, or replace the content of the message with the same
    /// id in place.
    pub async fn push_message(&self, id: impl Into<String>, role: Role, content: impl Into<String>) {
        self.state
            .write()
            .await
            .upsert(ChatMessage::new(id, role, content));
        self.notify_change();
    }

    /// Remove a message by id. Returns whether it existed.
    pub async fn remove_message(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.state.write().await;
            let before = state.entries.len();
            state.entries.retain(|e| e.message.id != id);
            state.entries.len() != before
        };
        if removed {
            self.notify_change();
        }
        removed
    }

    pub async fn message(&self, id: &str) -> Option<ChatMessage> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .find(|e| e.message.id == id)
            .map(|e| e.message.clone())
    }

    /// Every message, system turns included, in insertion order.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }

    /// Role + content of every message, for reuse as generator input.
    ///
    /// A message still being revealed contributes its full text.
    pub async fn history(&self) -> Vec<ChatTurn> {
        let revealing: HashMap<String, String> = self
            .active_reveals()
            .into_iter()
            .map(|r| (r.control.message_id.clone(), r.control.full_text.clone()))
            .collect();

        self.state
            .read()
            .await
            .entries
            .iter()
            .map(|e| {
                let mut turn = e.message.to_turn();
                if let Some(full_text) = revealing.get(&e.message.id) {
                    turn.content = full_text.clone();
                }
                turn
            })
            .collect()
    }

    /// User and assistant entries only, tagged with their insertion index.
    pub async fn timeline(&self) -> Vec<TimelineEntry> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .filter(|e| e.message.is_visible())
            .map(|e| TimelineEntry {
                index: e.index,
                id: e.message.id.clone(),
                role: e.message.role,
                content: e.message.content.clone(),
            })
            .collect()
    }

    pub async fn set_pending_input(&self, input: impl Into<String>) {
        self.state.write().await.pending_input = input.into();
        self.notify_change();
    }

    pub async fn pending_input(&self) -> String {
        self.state.read().await.pending_input.clone()
    }

    /// Messages and pending input, read under one lock.
    pub async fn snapshot(&self) -> (Vec<ChatMessage>, String) {
        let state = self.state.read().await;
        (
            state.entries.iter().map(|e| e.message.clone()).collect(),
            state.pending_input.clone(),
        )
    }

    /// Replace the whole log (draft rehydration). Indices are reassigned in
    /// order.
    pub async fn restore(&self, messages: Vec<ChatMessage>, pending_input: String) {
        {
            let mut state = self.state.write().await;
            state.entries.clear();
            for message in messages {
                state.upsert(message);
            }
            state.pending_input = pending_input;
        }
        self.notify_change();
    }

    /// Drop every message and the pending input. Running reveals are
    /// cancelled first.
    pub async fn clear(&self) {
        self.cancel_reveals();
        self.restore(Vec::new(), String::new()).await;
    }

    /// Reveal `full_text` progressively under message `id`.
    ///
    /// The message is created (or reset) empty, then grown on a timer with
    /// paragraph pauses. `on_done` fires exactly once when the full text is
    /// shown, whether naturally or through [`RevealHandle::skip`].
    pub async fn stream_assistant_reply(
        self: &Arc<Self>,
        full_text: impl Into<String>,
        id: impl Into<String>,
        on_done: Option<OnDone>,
    ) -> RevealHandle {
        let full_text = full_text.into();
        let id = id.into();
        let control = Arc::new(RevealControl::new(id.clone(), full_text, on_done));
        let handle = RevealHandle {
            control: Arc::clone(&control),
            timeline: Arc::downgrade(self),
        };

        self.push_message(id.clone(), Role::Assistant, "").await;

        if control.full_text.is_empty() {
            control.mark_finished();
            control.complete(RevealStatus::Completed);
            return handle;
        }

        let frames: Vec<_> = RevealSchedule::new(&control.full_text, self.reveal_config).collect();
        debug!(message_id = %id, frames = frames.len(), "Starting reveal");

        let task = tokio::spawn(run_reveal(Arc::downgrade(self), Arc::clone(&control), frames));
        control.set_task(task);

        if let Ok(mut reveals) = self.reveals.lock() {
            reveals.retain(RevealHandle::is_running);
            reveals.push(handle.clone());
        }
        handle
    }

    /// Write the first `len` bytes of a reveal's text, unless the reveal was
    /// cancelled or already finished. Returns `Some(true)` when this write
    /// finished it, `Some(false)` for a partial write, `None` when refused.
    pub(crate) async fn write_reveal(&self, control: &RevealControl, len: usize) -> Option<bool> {
        let len = len.min(control.full_text.len());
        let finished = {
            let mut state = self.state.write().await;
            if control.is_stopped() {
                return None;
            }
            let Some(shown) = control.full_text.get(..len) else {
                return None;
            };
            if !state.set_content(&control.message_id, shown) {
                // Message was removed underneath the reveal.
                control.mark_finished();
                return None;
            }
            let finished = len == control.full_text.len();
            if finished {
                control.mark_finished();
            }
            finished
        };
        self.notify_change();
        Some(finished)
    }

    fn active_reveals(&self) -> Vec<RevealHandle> {
        self.reveals
            .lock()
            .map(|reveals| reveals.iter().filter(|r| r.is_running()).cloned().collect())
            .unwrap_or_default()
    }

    /// Jump every running reveal to its full text.
    pub async fn skip_active_reveals(&self) {
        for reveal in self.active_reveals() {
            reveal.skip().await;
        }
    }

    /// Teardown: stop every running reveal without further writes.
    pub fn cancel_reveals(&self) {
        for reveal in self.active_reveals() {
            reveal.cancel();
        }
        if let Ok(mut reveals) = self.reveals.lock() {
            reveals.clear();
        }
    }

    pub fn has_active_reveal(&self) -> bool {
        !self.active_reveals().is_empty()
    }
}
