//! Connection session: bridges one socket's lifecycle to hub membership.
//!
//! A session joins the hub on open and leaves it exactly once, however the
//! socket ends: clean close, transport error, hub eviction, or the task being
//! dropped mid-flight. `close` is idempotent and `Drop` calls it.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::hub::{ConnectionId, Hub, IngestOutcome, SharedFrame};

pub struct Session {
    id: ConnectionId,
    hub: Hub,
    joined: bool,
}

impl Session {
    /// Assign a connection ID and register the outbound queue with the hub.
    #[must_use]
    pub fn open(hub: Hub, outbound: mpsc::Sender<SharedFrame>) -> Self {
        let id = Uuid::new_v4();
        hub.join(id, outbound);
        Self { id, hub, joined: true }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Inbound text from the socket.
    pub fn on_text(&self, text: &str) -> IngestOutcome {
        self.hub.ingest(text, self.id)
    }

    /// Leave the hub. Returns `true` only on the first call.
    pub fn close(&mut self) -> bool {
        if !std::mem::take(&mut self.joined) {
            return false;
        }
        self.hub.leave(self.id);
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
