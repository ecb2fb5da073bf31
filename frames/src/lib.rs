//! Chat envelope model and JSON text codec for the realtime WS transport.
//!
//! This crate owns the wire representation shared by `server` and `client`.
//! Every chat frame on the wire is a single UTF-8 JSON object:
//!
//! ```text
//! {"kind":"chat-message","authorId":"..","text":"..","serverTimestamp":0}
//! ```
//!
//! DESIGN
//! ======
//! - `kind` is not stored on [`ChatEnvelope`]; it is written by [`encode`] and
//!   checked by [`decode`]. Frames of another kind decode to
//!   [`DecodeError::WrongKind`] so callers can skip them quietly.
//! - `serverTimestamp` is carried but never validated. The hub overwrites it
//!   before fan-out, so anything a sender puts there is irrelevant.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{Map, Value};

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// The only envelope kind this protocol version understands.
pub const CHAT_MESSAGE_KIND: &str = "chat-message";

/// Upper bound on `authorId`, measured in characters after trimming.
pub const MAX_AUTHOR_ID_LEN: usize = 50;

/// Upper bound on `text`, measured in characters as sent.
pub const MAX_TEXT_LEN: usize = 1000;

pub const FIELD_KIND: &str = "kind";
pub const FIELD_AUTHOR_ID: &str = "authorId";
pub const FIELD_TEXT: &str = "text";
pub const FIELD_SERVER_TIMESTAMP: &str = "serverTimestamp";

// =============================================================================
// TYPES
// =============================================================================

/// Error returned by [`decode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not a JSON object or has no `kind`.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// `kind` is present but is not `"chat-message"`.
    #[error("unsupported frame kind: {0}")]
    WrongKind(String),
    /// A chat field is missing, not a string, blank, or too long.
    #[error("invalid field: {0}")]
    FieldInvalid(&'static str),
}

impl DecodeError {
    /// Wrong-kind frames are expected traffic, not faults.
    #[must_use]
    pub fn is_wrong_kind(&self) -> bool {
        matches!(self, Self::WrongKind(_))
    }
}

/// One chat message as it travels between clients and the hub.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEnvelope {
    pub author_id: String,
    pub text: String,
    /// Milliseconds since the Unix epoch, assigned by the hub.
    pub server_timestamp: i64,
}

impl ChatEnvelope {
    pub fn new(author_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { author_id: author_id.into(), text: text.into(), server_timestamp: 0 }
    }

    #[must_use]
    pub fn with_server_timestamp(mut self, server_timestamp: i64) -> Self {
        self.server_timestamp = server_timestamp;
        self
    }

    /// Canonical copy for broadcast: author and text trimmed, timestamp stamped.
    #[must_use]
    pub fn canonical(&self, server_timestamp: i64) -> Self {
        Self {
            author_id: self.author_id.trim().to_owned(),
            text: self.text.trim().to_owned(),
            server_timestamp,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope<'a> {
    kind: &'static str,
    author_id: &'a str,
    text: &'a str,
    server_timestamp: i64,
}

// =============================================================================
// CODEC
// =============================================================================

/// Encode an envelope into a JSON text frame.
#[must_use]
pub fn encode(envelope: &ChatEnvelope) -> String {
    let wire = WireEnvelope {
        kind: CHAT_MESSAGE_KIND,
        author_id: &envelope.author_id,
        text: &envelope.text,
        server_timestamp: envelope.server_timestamp,
    };
    // Serializing a struct of strings and an integer cannot fail.
    serde_json::to_string(&wire).unwrap_or_default()
}

/// Decode and validate a JSON text frame.
///
/// Field values are returned as sent (untrimmed); validation applies to the
/// trimmed value. Use [`ChatEnvelope::canonical`] to normalize.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] for non-JSON or non-object frames and
/// frames without `kind`, [`DecodeError::WrongKind`] for other kinds, and
/// [`DecodeError::FieldInvalid`] naming the first bad field.
pub fn decode(frame: &str) -> Result<ChatEnvelope, DecodeError> {
    let value: Value = serde_json::from_str(frame).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(DecodeError::Malformed("frame is not a JSON object".into()));
    };

    match fields.get(FIELD_KIND) {
        Some(Value::String(kind)) if kind == CHAT_MESSAGE_KIND => {}
        Some(Value::String(kind)) => return Err(DecodeError::WrongKind(kind.clone())),
        Some(other) => return Err(DecodeError::WrongKind(other.to_string())),
        None => return Err(DecodeError::Malformed("missing kind".into())),
    }

    let author_id = text_field(&fields, FIELD_AUTHOR_ID)?;
    if char_len(author_id.trim()) > MAX_AUTHOR_ID_LEN {
        return Err(DecodeError::FieldInvalid(FIELD_AUTHOR_ID));
    }

    let text = text_field(&fields, FIELD_TEXT)?;
    if char_len(text) > MAX_TEXT_LEN {
        return Err(DecodeError::FieldInvalid(FIELD_TEXT));
    }

    let server_timestamp = fields
        .get(FIELD_SERVER_TIMESTAMP)
        .and_then(Value::as_i64)
        .unwrap_or(0);

    Ok(ChatEnvelope { author_id: author_id.to_owned(), text: text.to_owned(), server_timestamp })
}

/// A required string field that is non-blank after trimming.
fn text_field<'a>(fields: &'a Map<String, Value>, name: &'static str) -> Result<&'a str, DecodeError> {
    match fields.get(name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        _ => Err(DecodeError::FieldInvalid(name)),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Length in characters, the unit all envelope bounds are expressed in.
#[must_use]
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
