//! Character-reveal ("typing") scheduling.
//!
//! A reply is fully known before it is shown; the reveal discloses it a few
//! characters per tick and pauses at paragraph boundaries. The schedule is a
//! pure iterator so the pacing rules can be tested without timers; the
//! timeline drives it from a spawned task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;

use super::timeline::Timeline;

/// Pacing of a reveal.
#[derive(Debug, Clone, Copy)]
pub struct RevealConfig {
    pub chunk_chars: usize,
    pub tick: Duration,
    pub paragraph_pause: Duration,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RevealConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            chunk_chars: config.reveal_chunk_chars.max(1),
            tick: config.reveal_tick,
            paragraph_pause: config.paragraph_pause,
        }
    }
}

/// Byte offsets that start a new paragraph: the end of every run of two or
/// more line breaks, excluding the end of the text. Strictly increasing.
pub fn paragraph_boundaries(text: &str) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut boundaries = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\n' && bytes[i] != b'\r' {
            i += 1;
            continue;
        }
        let mut newlines = 0;
        while i < bytes.len() && (bytes[i] == b'\n' || bytes[i] == b'\r') {
            if bytes[i] == b'\n' {
                newlines += 1;
            }
            i += 1;
        }
        if newlines >= 2 && i < bytes.len() {
            boundaries.push(i);
        }
    }
    boundaries
}

/// One step of a reveal: wait `delay`, then show the first `len` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealFrame {
    pub len: usize,
    pub delay: Duration,
    /// Whether this frame was clamped to a paragraph boundary.
    pub at_boundary: bool,
}

/// Iterator over the frames of one reveal.
pub struct RevealSchedule<'a> {
    text: &'a str,
    boundaries: Vec<usize>,
    next_boundary: usize,
    revealed: usize,
    config: RevealConfig,
    next_delay: Duration,
}

impl<'a> RevealSchedule<'a> {
    pub fn new(text: &'a str, config: RevealConfig) -> Self {
        Self {
            text,
            boundaries: paragraph_boundaries(text),
            next_boundary: 0,
            revealed: 0,
            config,
            next_delay: config.tick,
        }
    }

    /// Byte offset `chars` characters past `from`, capped at the end.
    fn advance(&self, from: usize, chars: usize) -> usize {
        self.text[from..]
            .char_indices()
            .nth(chars)
            .map(|(i, _)| from + i)
            .unwrap_or(self.text.len())
    }
}

impl Iterator for RevealSchedule<'_> {
    type Item = RevealFrame;

    fn next(&mut self) -> Option<RevealFrame> {
        if self.revealed >= self.text.len() {
            return None;
        }

        let candidate = self.advance(self.revealed, self.config.chunk_chars.max(1));

        while self
            .boundaries
            .get(self.next_boundary)
            .is_some_and(|&b| b <= self.revealed)
        {
            self.next_boundary += 1;
        }

        let (len, at_boundary) = match self.boundaries.get(self.next_boundary) {
            Some(&boundary) if boundary <= candidate => {
                self.next_boundary += 1;
                (boundary, true)
            }
            _ => (candidate, false),
        };

        let frame = RevealFrame {
            len,
            delay: self.next_delay,
            at_boundary,
        };
        self.next_delay = if at_boundary {
            self.config.paragraph_pause
        } else {
            self.config.tick
        };
        self.revealed = len;
        Some(frame)
    }
}

/// Callback fired once when a reveal reaches its full text.
pub type OnDone = Box<dyn FnOnce() + Send + 'static>;

/// Where a reveal is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealStatus {
    Running,
    /// Reached the full text on its own.
    Completed,
    /// Jumped to the full text via `skip()`.
    Skipped,
    /// Torn down before finishing; no further writes happen.
    Cancelled,
}

/// Shared state between a reveal task, its handle and the timeline.
pub(crate) struct RevealControl {
    pub(crate) message_id: String,
    pub(crate) full_text: String,
    finished: AtomicBool,
    cancelled: AtomicBool,
    on_done: Mutex<Option<OnDone>>,
    status: watch::Sender<RevealStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RevealControl {
    pub(crate) fn new(message_id: String, full_text: String, on_done: Option<OnDone>) -> Self {
        let (status, _) = watch::channel(RevealStatus::Running);
        Self {
            message_id,
            full_text,
            finished: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            on_done: Mutex::new(on_done),
            status,
            task: Mutex::new(None),
        }
    }

    /// Checked under the timeline lock before every reveal write.
    pub(crate) fn is_stopped(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.finished.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    /// Fire `on_done` (at most once) and publish the final status.
    pub(crate) fn complete(&self, status: RevealStatus) {
        let callback = self.on_done.lock().ok().and_then(|mut slot| slot.take());
        if let Some(callback) = callback {
            callback();
        }
        self.status.send_replace(status);
    }

    pub(crate) fn set_task(&self, task: JoinHandle<()>) {
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(task);
        }
    }

    fn abort_task(&self) {
        if let Some(task) = self.task.lock().ok().and_then(|mut slot| slot.take()) {
            task.abort();
        }
    }
}

/// Handle to one in-flight reveal.
#[derive(Clone)]
pub struct RevealHandle {
    pub(crate) control: Arc<RevealControl>,
    pub(crate) timeline: Weak<Timeline>,
}

impl std::fmt::Debug for RevealHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevealHandle")
            .field("message_id", &self.control.message_id)
            .field("status", &self.status())
            .finish()
    }
}

impl RevealHandle {
    pub fn message_id(&self) -> &str {
        &self.control.message_id
    }

    pub fn status(&self) -> RevealStatus {
        *self.control.status.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.status() == RevealStatus::Running
    }

    /// Jump to the full text, cancel pending ticks and fire `on_done`.
    /// No-op once the reveal has finished or been cancelled.
    pub async fn skip(&self) {
        let Some(timeline) = self.timeline.upgrade() else {
            return;
        };
        let finished = timeline
            .write_reveal(&self.control, self.control.full_text.len())
            .await;
        if finished == Some(true) {
            self.control.abort_task();
            self.control.complete(RevealStatus::Skipped);
        }
    }

    /// Stop without writing anything further. `on_done` is not fired.
    pub fn cancel(&self) {
        if self.control.finished.load(Ordering::SeqCst) {
            return;
        }
        self.control.cancelled.store(true, Ordering::SeqCst);
        self.control.abort_task();
        self.control.status.send_replace(RevealStatus::Cancelled);
    }

    /// Wait until the reveal completes, is skipped or is cancelled.
    pub async fn wait(&self) -> RevealStatus {
        let mut rx = self.control.status.subscribe();
        match rx.wait_for(|s| *s != RevealStatus::Running).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }
}

/// Drive a reveal: wait each frame's delay, then write it through the
/// timeline. Stops as soon as a write is refused.
pub(crate) async fn run_reveal(
    timeline: Weak<Timeline>,
    control: Arc<RevealControl>,
    frames: Vec<RevealFrame>,
) {
    for frame in frames {
        tokio::time::sleep(frame.delay).await;
        let Some(timeline) = timeline.upgrade() else {
            return;
        };
        match timeline.write_reveal(&control, frame.len).await {
            Some(true) => {
                control.complete(RevealStatus::Completed);
                return;
            }
            Some(false) => {}
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk: usize) -> RevealConfig {
        RevealConfig {
            chunk_chars: chunk,
            tick: Duration::from_millis(10),
            paragraph_pause: Duration::from_millis(150),
        }
    }

    #[test]
    fn boundaries_follow_blank_lines() {
        let text = "One.\n\nTwo.\n\n\nThree.\nStill three.";
        assert_eq!(paragraph_boundaries(text), vec![6, 13]);
    }

    #[test]
    fn trailing_break_is_not_a_boundary() {
        assert!(paragraph_boundaries("Only one paragraph.\n\n").is_empty());
        assert!(paragraph_boundaries("single\nbreak").is_empty());
    }

    #[test]
    fn crlf_breaks_count() {
        let text = "A\r\n\r\nB";
        assert_eq!(paragraph_boundaries(text), vec![5]);
    }

    #[test]
    fn schedule_ends_exactly_at_full_length() {
        let text = "Hello there, this is a reply.\n\nAnd a second paragraph.";
        let frames: Vec<_> = RevealSchedule::new(text, config(4)).collect();
        assert_eq!(frames.last().unwrap().len, text.len());
        for pair in frames.windows(2) {
            assert!(pair[1].len > pair[0].len, "lengths must grow");
        }
    }

    #[test]
    fn clamps_to_boundary_and_pauses_once() {
        let text = "abcd\n\nefgh";
        // boundary at 6; chunk 4 → 4, then 8 would cross 6 → clamp to 6.
        let frames: Vec<_> = RevealSchedule::new(text, config(4)).collect();
        let lens: Vec<usize> = frames.iter().map(|f| f.len).collect();
        assert_eq!(lens, vec![4, 6, 10]);
        assert!(frames[1].at_boundary);
        assert_eq!(frames[0].delay, Duration::from_millis(10));
        assert_eq!(frames[1].delay, Duration::from_millis(10));
        assert_eq!(frames[2].delay, Duration::from_millis(150));
    }

    #[test]
    fn landing_on_boundary_counts_as_reaching_it() {
        let text = "ab\n\ncd";
        let frames: Vec<_> = RevealSchedule::new(text, config(4)).collect();
        assert_eq!(frames[0].len, 4);
        assert!(frames[0].at_boundary);
        assert_eq!(frames.iter().filter(|f| f.at_boundary).count(), 1);
    }

    #[test]
    fn pause_offsets_strictly_increase_and_are_used_once() {
        let text = "p1\n\np2 is longer\n\n\np3\n\np4 ends here";
        let boundaries = paragraph_boundaries(text);
        let used: Vec<usize> = RevealSchedule::new(text, config(5))
            .filter(|f| f.at_boundary)
            .map(|f| f.len)
            .collect();
        assert_eq!(used, boundaries);
        for pair in used.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn multibyte_text_stays_on_char_boundaries() {
        let text = "héllo wörld ✨\n\nnäxt";
        for frame in RevealSchedule::new(text, config(2)) {
            assert!(text.is_char_boundary(frame.len));
        }
    }

    #[test]
    fn empty_text_has_no_frames() {
        assert_eq!(RevealSchedule::new("", config(3)).count(), 0);
    }
}
