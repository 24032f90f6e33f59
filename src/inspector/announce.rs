//! Status announcements, queued and time-boxed.
//!
//! Each announcement stays up for at least `min_display_ms`; queued ones
//! follow in order, and the default hint returns once the queue is empty
//! and the last announcement has had its time. The clock is passed in.

use std::collections::VecDeque;

pub const DEFAULT_HINT: &str = "Listening for accessibility events";

#[derive(Debug)]
struct Shown {
    text: String,
    since: u64,
}

#[derive(Debug)]
pub struct AnnouncementQueue {
    pending: VecDeque<String>,
    current: Option<Shown>,
    min_display_ms: u64,
    hint: String,
}

impl AnnouncementQueue {
    pub fn new(min_display_ms: u64) -> Self {
        Self::with_hint(min_display_ms, DEFAULT_HINT)
    }

    pub fn with_hint(min_display_ms: u64, hint: &str) -> Self {
        Self {
            pending: VecDeque::new(),
            current: None,
            min_display_ms,
            hint: hint.to_string(),
        }
    }

    pub fn push(&mut self, text: impl Into<String>) {
        self.pending.push_back(text.into());
    }

    /// What the status line shows at `now` (epoch millis).
    pub fn display(&mut self, now: u64) -> &str {
        let expired = match &self.current {
            Some(shown) => now.saturating_sub(shown.since) >= self.min_display_ms,
            None => true,
        };
        if expired {
            self.current = self
                .pending
                .pop_front()
                .map(|text| Shown { text, since: now });
        }
        match &self.current {
            Some(shown) => &shown.text,
            None => &self.hint,
        }
    }

    /// Nothing shown and nothing waiting.
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
