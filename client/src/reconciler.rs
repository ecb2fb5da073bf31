//! Displayed chat history: optimistic self messages merged with server echoes.
//!
//! DESIGN
//! ======
//! A self message is shown as soon as it is submitted. When the hub echoes it
//! back, the echo is dropped if a self entry with the same author and text was
//! added within the last [`SELF_ECHO_WINDOW_MS`] of local time. Matching does
//! not consume the entry. Windows are measured on the local receipt clock,
//! since the optimistic copy only has a client timestamp and the echo only has
//! a server timestamp.
//!
//! History keeps the newest [`MAX_RETAINED`] entries, oldest evicted first.

use std::collections::VecDeque;

use frames::ChatEnvelope;
use time::{OffsetDateTime, UtcOffset};

pub const MAX_RETAINED: usize = 500;
pub const SELF_ECHO_WINDOW_MS: i64 = 2_000;

/// Author of locally generated notices.
pub const SYSTEM_AUTHOR: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    /// Unique per process run, increasing in insertion order.
    pub local_id: u64,
    pub envelope: ChatEnvelope,
    pub is_self: bool,
    pub is_system: bool,
    /// `HH:MM` label for `envelope.server_timestamp`.
    pub display_time: String,
    /// Local clock reading (ms since epoch) when the entry was added.
    pub received_at: i64,
}

#[derive(Debug)]
pub struct Reconciler {
    messages: VecDeque<DisplayMessage>,
    next_local_id: u64,
    offset: UtcOffset,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::with_offset(UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC))
    }
}

impl Reconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Render time labels in a fixed UTC offset.
    #[must_use]
    pub fn with_offset(offset: UtcOffset) -> Self {
        Self { messages: VecDeque::new(), next_local_id: 1, offset }
    }

    pub fn messages(&self) -> impl ExactSizeIterator<Item = &DisplayMessage> {
        self.messages.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Merge one envelope from the server. Returns the new entry, or `None`
    /// when it was the echo of a message already shown.
    pub fn on_receive(&mut self, envelope: ChatEnvelope, identity: Option<&str>) -> Option<&DisplayMessage> {
        self.on_receive_at(envelope, identity, frames::now_ms())
    }

    pub fn on_receive_at(
        &mut self,
        envelope: ChatEnvelope,
        identity: Option<&str>,
        now_ms: i64,
    ) -> Option<&DisplayMessage> {
        let is_self = identity.is_some_and(|id| id == envelope.author_id);
        if is_self && self.has_recent_self_copy(&envelope, now_ms) {
            return None;
        }
        Some(self.append(envelope, is_self, false, now_ms))
    }

    /// Show a message the user just sent, before the server confirms it.
    pub fn push_local_at(&mut self, envelope: ChatEnvelope, now_ms: i64) -> &DisplayMessage {
        self.append(envelope, true, false, now_ms)
    }

    /// Show a local notice authored by [`SYSTEM_AUTHOR`].
    pub fn push_system_at(&mut self, text: impl Into<String>, now_ms: i64) -> &DisplayMessage {
        let envelope = ChatEnvelope::new(SYSTEM_AUTHOR, text).with_server_timestamp(now_ms);
        self.append(envelope, false, true, now_ms)
    }

    #[must_use]
    pub fn format_time_label(&self, timestamp_ms: i64) -> String {
        format_time_label_in(timestamp_ms, self.offset)
    }

    fn has_recent_self_copy(&self, envelope: &ChatEnvelope, now_ms: i64) -> bool {
        self.messages
            .iter()
            .rev()
            .take_while(|m| now_ms - m.received_at < SELF_ECHO_WINDOW_MS)
            .any(|m| {
                m.is_self
                    && m.envelope.author_id == envelope.author_id
                    && m.envelope.text == envelope.text
            })
    }

    fn append(&mut self, envelope: ChatEnvelope, is_self: bool, is_system: bool, now_ms: i64) -> &DisplayMessage {
        let local_id = self.next_local_id;
        self.next_local_id += 1;
        let display_time = self.format_time_label(envelope.server_timestamp);

        self.messages.push_back(DisplayMessage { local_id, envelope, is_self, is_system, display_time, received_at: now_ms });
        while self.messages.len() > MAX_RETAINED {
            self.messages.pop_front();
        }
        // Just pushed, so never empty.
        &self.messages[self.messages.len() - 1]
    }
}

/// `HH:MM` for a millisecond Unix timestamp in the given offset.
#[must_use]
pub fn format_time_label_in(timestamp_ms: i64, offset: UtcOffset) -> String {
    let nanos = i128::from(timestamp_ms) * 1_000_000;
    match OffsetDateTime::from_unix_timestamp_nanos(nanos) {
        Ok(at) => {
            let at = at.to_offset(offset);
            format!("{:02}:{:02}", at.hour(), at.minute())
        }
        Err(_) => "--:--".to_owned(),
    }
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod tests;
