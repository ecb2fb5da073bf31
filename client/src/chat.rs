//! Chat composer: local validation, optimistic display, and identity.
//!
//! [`ChatClient`] is what a UI talks to. It owns the [`Reconciler`] and the
//! current identity, and sends through any [`Outbound`] (normally the
//! [`ConnectionManager`]). Problems the user should see become system notices
//! in the history as well as a [`ComposeError`].

use frames::{ChatEnvelope, MAX_AUTHOR_ID_LEN, MAX_TEXT_LEN, char_len};
use tracing::debug;

use crate::machine::ConnectionState;
use crate::manager::{ConnectionManager, SendRejected};
use crate::reconciler::{DisplayMessage, Reconciler};

pub const NOTICE_NOT_CONNECTED: &str = "Not connected to the server. Wait for the connection and try again.";
pub const NOTICE_TOO_LONG: &str = "Message too long. Keep it within 1000 characters.";
pub const NOTICE_IDENTITY_MISSING: &str = "Set your ID before you start chatting.";
pub const NOTICE_IDENTITY_TOO_LONG: &str = "ID too long. Keep it within 50 characters.";
pub const NOTICE_SEND_FAILED: &str = "Message could not be sent and is only shown locally.";

/// Where composed envelopes go.
pub trait Outbound {
    fn state(&self) -> ConnectionState;

    /// # Errors
    ///
    /// Returns [`SendRejected`] when the envelope could not be queued.
    fn send(&self, envelope: &ChatEnvelope) -> Result<(), SendRejected>;
}

impl Outbound for ConnectionManager {
    fn state(&self) -> ConnectionState {
        ConnectionManager::state(self)
    }

    fn send(&self, envelope: &ChatEnvelope) -> Result<(), SendRejected> {
        ConnectionManager::send(self, envelope)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComposeError {
    #[error("not connected ({0})")]
    NotConnected(ConnectionState),
    #[error("message is empty")]
    Empty,
    #[error("message is {len} characters, limit is {max}")]
    TooLong { len: usize, max: usize },
    #[error("no identity set")]
    IdentityMissing,
    #[error("identity is {len} characters, limit is {max}")]
    IdentityTooLong { len: usize, max: usize },
    #[error("send rejected: {0}")]
    Rejected(SendRejected),
}

pub struct ChatClient<O> {
    outbound: O,
    reconciler: Reconciler,
    identity: Option<String>,
}

impl<O: Outbound> ChatClient<O> {
    pub fn new(outbound: O) -> Self {
        Self::with_reconciler(outbound, Reconciler::new())
    }

    pub fn with_reconciler(outbound: O, reconciler: Reconciler) -> Self {
        Self { outbound, reconciler, identity: None }
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Set the local identity. Blank input is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ComposeError::IdentityTooLong`] and keeps the old identity
    /// when the trimmed input is over the author bound.
    pub fn set_identity(&mut self, raw: &str) -> Result<(), ComposeError> {
        self.set_identity_at(raw, frames::now_ms())
    }

    /// # Errors
    ///
    /// See [`ChatClient::set_identity`].
    pub fn set_identity_at(&mut self, raw: &str, now_ms: i64) -> Result<(), ComposeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        let len = char_len(trimmed);
        if len > MAX_AUTHOR_ID_LEN {
            self.reconciler.push_system_at(NOTICE_IDENTITY_TOO_LONG, now_ms);
            return Err(ComposeError::IdentityTooLong { len, max: MAX_AUTHOR_ID_LEN });
        }
        debug!(identity = %trimmed, "chat: identity set");
        self.identity = Some(trimmed.to_owned());
        Ok(())
    }

    /// Validate, show optimistically, and send one message.
    ///
    /// # Errors
    ///
    /// Returns a [`ComposeError`] naming the first failed check. Every error
    /// except [`ComposeError::Empty`] also leaves a system notice.
    pub fn submit(&mut self, raw: &str) -> Result<(), ComposeError> {
        self.submit_at(raw, frames::now_ms())
    }

    /// # Errors
    ///
    /// See [`ChatClient::submit`].
    pub fn submit_at(&mut self, raw: &str, now_ms: i64) -> Result<(), ComposeError> {
        let state = self.outbound.state();
        if state != ConnectionState::Open {
            self.reconciler.push_system_at(NOTICE_NOT_CONNECTED, now_ms);
            return Err(ComposeError::NotConnected(state));
        }

        let text = raw.trim();
        if text.is_empty() {
            return Err(ComposeError::Empty);
        }
        let len = char_len(text);
        if len > MAX_TEXT_LEN {
            self.reconciler.push_system_at(NOTICE_TOO_LONG, now_ms);
            return Err(ComposeError::TooLong { len, max: MAX_TEXT_LEN });
        }
        let Some(identity) = self.identity.as_deref() else {
            self.reconciler.push_system_at(NOTICE_IDENTITY_MISSING, now_ms);
            return Err(ComposeError::IdentityMissing);
        };

        let envelope = ChatEnvelope::new(identity, text).with_server_timestamp(now_ms);
        self.reconciler.push_local_at(envelope.clone(), now_ms);
        if let Err(e) = self.outbound.send(&envelope) {
            self.reconciler.push_system_at(NOTICE_SEND_FAILED, now_ms);
            return Err(ComposeError::Rejected(e));
        }
        Ok(())
    }

    /// Merge one envelope from the server under the current identity.
    pub fn receive(&mut self, envelope: ChatEnvelope) -> Option<&DisplayMessage> {
        self.receive_at(envelope, frames::now_ms())
    }

    pub fn receive_at(&mut self, envelope: ChatEnvelope, now_ms: i64) -> Option<&DisplayMessage> {
        self.reconciler.on_receive_at(envelope, self.identity.as_deref(), now_ms)
    }

    pub fn messages(&self) -> impl ExactSizeIterator<Item = &DisplayMessage> {
        self.reconciler.messages()
    }

    pub fn outbound(&self) -> &O {
        &self.outbound
    }

    pub fn outbound_mut(&mut self) -> &mut O {
        &mut self.outbound
    }
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
