//! Broadcast hub: membership set and per-recipient fan-out.
//!
//! DESIGN
//! ======
//! The hub maps connection IDs to writable member sinks. Sessions own their
//! socket; the hub only holds the sending half of each session's outbound
//! queue, so there are no ownership cycles between sessions and the hub.
//!
//! One mutex guards the membership map. `ingest` holds it across timestamp
//! assignment and fan-out, which makes broadcast order a total order: every
//! member sees accepted messages in the order their timestamps were stamped.
//!
//! ERROR HANDLING
//! ==============
//! Nothing here returns an error to the sender. Bad frames are logged and
//! dropped. A member whose queue is full or closed is logged and evicted;
//! delivery to the rest of the members continues. Delivery uses `try_send`,
//! so a slow member never stalls the hub.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use frames::{ChatEnvelope, DecodeError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

// =============================================================================
// TYPES
// =============================================================================

/// Stable per-connection identifier, assigned by the session on accept.
pub type ConnectionId = Uuid;

/// Encoded frame shared by every recipient of one broadcast.
pub type SharedFrame = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("member queue full")]
    Full,
    #[error("member disconnected")]
    Closed,
}

/// Writable handle to one member. Must not block.
pub trait MemberSink: Send + Sync {
    /// Hand one encoded frame to the member.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] when the frame cannot be queued right now.
    fn try_deliver(&self, frame: &SharedFrame) -> Result<(), DeliveryError>;
}

impl MemberSink for mpsc::Sender<SharedFrame> {
    fn try_deliver(&self, frame: &SharedFrame) -> Result<(), DeliveryError> {
        self.try_send(Arc::clone(frame)).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// What happened to one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Members the encoded frame was offered to.
    pub attempted: usize,
    pub delivered: usize,
    /// Members removed because their write failed.
    pub evicted: Vec<ConnectionId>,
}

/// Result of [`Hub::ingest`]. Informational only; sessions never reply with it.
#[derive(Debug)]
pub enum IngestOutcome {
    Broadcast { envelope: ChatEnvelope, report: FanoutReport },
    /// A well-formed frame of a kind this server does not handle.
    Ignored,
    Dropped(DecodeError),
}

// =============================================================================
// HUB
// =============================================================================

type Members = HashMap<ConnectionId, Box<dyn MemberSink>>;

/// Shared broadcast hub. Clone is cheap; all clones share one membership set.
#[derive(Clone, Default)]
pub struct Hub {
    members: Arc<Mutex<Members>>,
}

impl Hub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member. Re-joining with the same ID replaces the previous sink.
    pub fn join(&self, id: ConnectionId, sink: impl MemberSink + 'static) {
        let mut members = self.lock();
        members.insert(id, Box::new(sink));
        info!(connection_id = %id, members = members.len(), "hub: member joined");
    }

    /// Remove a member. Returns `false` if it was already gone.
    pub fn leave(&self, id: ConnectionId) -> bool {
        let mut members = self.lock();
        let removed = members.remove(&id).is_some();
        if removed {
            info!(connection_id = %id, members = members.len(), "hub: member left");
        }
        removed
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_member(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Decode, validate, stamp, and broadcast one raw inbound frame.
    pub fn ingest(&self, raw: &str, from: ConnectionId) -> IngestOutcome {
        self.ingest_with_clock(raw, from, frames::now_ms)
    }

    /// Internal: ingest with an explicit clock (for testing).
    fn ingest_with_clock(&self, raw: &str, from: ConnectionId, clock: impl FnOnce() -> i64) -> IngestOutcome {
        let envelope = match frames::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) if e.is_wrong_kind() => {
                debug!(connection_id = %from, error = %e, "hub: ignored non-chat frame");
                return IngestOutcome::Ignored;
            }
            Err(e) => {
                warn!(connection_id = %from, error = %e, "hub: dropped invalid frame");
                return IngestOutcome::Dropped(e);
            }
        };

        let mut members = self.lock();
        let envelope = envelope.canonical(clock());
        let report = fanout_locked(&mut members, &envelope);
        debug!(
            connection_id = %from,
            author_id = %envelope.author_id,
            attempted = report.attempted,
            delivered = report.delivered,
            "hub: broadcast"
        );
        IngestOutcome::Broadcast { envelope, report }
    }

    /// Encode once and offer the frame to every current member.
    pub fn fanout(&self, envelope: &ChatEnvelope) -> FanoutReport {
        let mut members = self.lock();
        fanout_locked(&mut members, envelope)
    }

    fn lock(&self) -> MutexGuard<'_, Members> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn fanout_locked(members: &mut Members, envelope: &ChatEnvelope) -> FanoutReport {
    let frame: SharedFrame = Arc::from(frames::encode(envelope));
    let mut report = FanoutReport::default();

    for (id, sink) in members.iter() {
        report.attempted += 1;
        match sink.try_deliver(&frame) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!(connection_id = %id, error = %e, "hub: delivery failed, evicting member");
                report.evicted.push(*id);
            }
        }
    }

    for id in &report.evicted {
        members.remove(id);
    }
    report
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
