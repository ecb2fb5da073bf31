//! Connection state machine, free of I/O.
//!
//! DESIGN
//! ======
//! [`ConnectionMachine`] consumes [`Event`]s and answers with [`Command`]s for
//! the driver in `manager.rs` to carry out. Keeping timers and sockets out of
//! this file makes every transition testable without a runtime.
//!
//! Each dial attempt ends exactly once: by opening, by closing, or by timing
//! out. After a timeout the attempt is over, so a close reported for the same
//! attempt is ignored and cannot count a second retry.
//!
//! RETRY RULE
//! ==========
//! A failed attempt (abnormal close, dial error, or connect timeout) schedules
//! a reconnect while `retry_count < max_retries`, incrementing the count. Once
//! the count has reached `max_retries` the next failure is terminal
//! (`Errored`). A successful open resets the count to zero.

use std::fmt;

use tracing::{error, info, warn};

// =============================================================================
// TYPES
// =============================================================================

/// The only connection state the UI sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Errored,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Errored => "errored",
        }
    }

    /// Whether no further automatic transition can happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a transport ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Intentional close with the normal close code.
    Normal,
    /// Anything else: other close codes, I/O errors, failed dials.
    Abnormal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Opened,
    TransportClosed(CloseKind),
    ConnectTimedOut,
    ReconnectDue,
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    OpenTransport,
    ArmConnectTimeout,
    CancelConnectTimeout,
    ScheduleReconnect,
    CancelReconnect,
    /// Abandon a pending dial and close the live transport, if any.
    CloseTransport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Dialing,
    Live,
    WaitingToRetry,
    Finished,
}

// =============================================================================
// MACHINE
// =============================================================================

#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    phase: Phase,
    retry_count: u32,
    max_retries: u32,
}

impl ConnectionMachine {
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self { state: ConnectionState::Connecting, phase: Phase::Idle, retry_count: 0, max_retries }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Begin the first dial. Later calls do nothing.
    pub fn start(&mut self) -> Vec<Command> {
        if self.phase != Phase::Idle {
            return Vec::new();
        }
        self.dial()
    }

    pub fn handle(&mut self, event: Event) -> Vec<Command> {
        match (self.phase, event) {
            (Phase::Dialing, Event::Opened) => {
                self.phase = Phase::Live;
                self.state = ConnectionState::Open;
                self.retry_count = 0;
                info!("conn: open");
                vec![Command::CancelConnectTimeout]
            }
            (Phase::Dialing, Event::ConnectTimedOut) => {
                warn!(retry_count = self.retry_count, "conn: connect timed out");
                let mut commands = vec![Command::CloseTransport];
                commands.extend(self.fail());
                commands
            }
            (Phase::Dialing, Event::TransportClosed(kind)) => {
                let mut commands = vec![Command::CancelConnectTimeout];
                commands.extend(self.closed(kind));
                commands
            }
            (Phase::Live, Event::TransportClosed(kind)) => self.closed(kind),
            (Phase::WaitingToRetry, Event::ReconnectDue) => self.dial(),
            (Phase::Idle, Event::Teardown) => self.finish(ConnectionState::Closed, Vec::new()),
            (Phase::Dialing, Event::Teardown) => {
                self.finish(ConnectionState::Closed, vec![Command::CancelConnectTimeout, Command::CloseTransport])
            }
            (Phase::Live, Event::Teardown) => self.finish(ConnectionState::Closed, vec![Command::CloseTransport]),
            (Phase::WaitingToRetry, Event::Teardown) => {
                self.finish(ConnectionState::Closed, vec![Command::CancelReconnect])
            }
            _ => Vec::new(),
        }
    }

    fn dial(&mut self) -> Vec<Command> {
        self.phase = Phase::Dialing;
        self.state = ConnectionState::Connecting;
        vec![Command::OpenTransport, Command::ArmConnectTimeout]
    }

    fn closed(&mut self, kind: CloseKind) -> Vec<Command> {
        match kind {
            CloseKind::Normal => {
                info!("conn: closed normally");
                self.finish(ConnectionState::Closed, Vec::new())
            }
            CloseKind::Abnormal => self.fail(),
        }
    }

    fn fail(&mut self) -> Vec<Command> {
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            self.phase = Phase::WaitingToRetry;
            self.state = ConnectionState::Connecting;
            info!(attempt = self.retry_count, max = self.max_retries, "conn: reconnect scheduled");
            vec![Command::ScheduleReconnect]
        } else {
            error!(max = self.max_retries, "conn: retries exhausted");
            self.finish(ConnectionState::Errored, Vec::new())
        }
    }

    fn finish(&mut self, state: ConnectionState, commands: Vec<Command>) -> Vec<Command> {
        self.phase = Phase::Finished;
        if !self.state.is_terminal() {
            self.state = state;
        }
        commands
    }
}

#[cfg(test)]
#[path = "machine_test.rs"]
mod tests;
