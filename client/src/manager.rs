//! Client connection manager.
//!
//! DESIGN
//! ======
//! One driver task owns the transport, both timers, and the
//! [`ConnectionMachine`]. Every input (user send, inbound frame, dial result,
//! timer expiry, teardown) arrives through one `select!` loop, so transitions
//! never race each other. The UI holds a [`ConnectionManager`] handle: state
//! is read from a `watch` channel, outbound frames and teardown go through an
//! unbounded control queue, decoded envelopes come back on an unbounded queue.
//!
//! Dropping the handle tears the connection down the same way
//! [`ConnectionManager::shutdown`] does, without waiting for it.

use std::sync::Arc;

use frames::ChatEnvelope;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConnectionSettings;
use crate::machine::{CloseKind, Command, ConnectionMachine, ConnectionState, Event};
use crate::timer::Timer;
use crate::transport::{Connector, Transport, TransportError, TransportEvent};

/// Why [`ConnectionManager::send`] did not queue a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendRejected {
    #[error("connection is {0}")]
    NotOpen(ConnectionState),
    #[error("connection manager stopped")]
    ManagerGone,
}

enum Control {
    Send(String),
    Shutdown,
}

type DialFuture = BoxFuture<'static, Result<Box<dyn Transport>, TransportError>>;

// =============================================================================
// HANDLE
// =============================================================================

pub struct ConnectionManager {
    control_tx: mpsc::UnboundedSender<Control>,
    state_rx: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Start connecting in a background task. Must be called inside a tokio
    /// runtime. Returns the handle and the queue of decoded inbound envelopes.
    pub fn spawn(
        connector: Arc<dyn Connector>,
        settings: ConnectionSettings,
    ) -> (Self, mpsc::UnboundedReceiver<ChatEnvelope>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let driver = Driver {
            connector,
            settings,
            machine: ConnectionMachine::new(settings.max_retries),
            state_tx,
            inbound_tx,
            dialing: None,
            transport: None,
            connect_timer: Timer::new(),
            reconnect_timer: Timer::new(),
        };
        let task = tokio::spawn(driver.run(control_rx));

        (Self { control_tx, state_rx, task: Some(task) }, inbound_rx)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Queue one envelope for the live transport.
    ///
    /// # Errors
    ///
    /// Returns [`SendRejected::NotOpen`] unless the state is `Open`, and
    /// [`SendRejected::ManagerGone`] once the driver has stopped.
    pub fn send(&self, envelope: &ChatEnvelope) -> Result<(), SendRejected> {
        let state = self.state();
        if state != ConnectionState::Open {
            warn!(%state, "conn: send rejected, not open");
            return Err(SendRejected::NotOpen(state));
        }
        self.control_tx
            .send(Control::Send(frames::encode(envelope)))
            .map_err(|_| SendRejected::ManagerGone)
    }

    /// Cancel timers, close the transport, and wait for the driver to stop.
    /// Safe to call more than once.
    pub async fn shutdown(&mut self) {
        let _ = self.control_tx.send(Control::Shutdown);
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "conn: driver task failed");
        }
    }
}

// =============================================================================
// DRIVER
// =============================================================================

struct Driver {
    connector: Arc<dyn Connector>,
    settings: ConnectionSettings,
    machine: ConnectionMachine,
    state_tx: watch::Sender<ConnectionState>,
    inbound_tx: mpsc::UnboundedSender<ChatEnvelope>,
    dialing: Option<DialFuture>,
    transport: Option<Box<dyn Transport>>,
    connect_timer: Timer,
    reconnect_timer: Timer,
}

impl Driver {
    async fn run(mut self, mut control_rx: mpsc::UnboundedReceiver<Control>) {
        let commands = self.machine.start();
        self.apply(commands).await;

        loop {
            let event = tokio::select! {
                control = control_rx.recv() => match control {
                    Some(Control::Send(frame)) => {
                        self.write(frame).await;
                        continue;
                    }
                    Some(Control::Shutdown) | None => Event::Teardown,
                },
                result = dial_result(&mut self.dialing) => match result {
                    Ok(transport) => {
                        self.transport = Some(transport);
                        Event::Opened
                    }
                    Err(e) => {
                        warn!(error = %e, "conn: dial failed");
                        Event::TransportClosed(CloseKind::Abnormal)
                    }
                },
                inbound = next_inbound(&mut self.transport) => match inbound {
                    TransportEvent::Text(text) => {
                        self.deliver(&text);
                        continue;
                    }
                    TransportEvent::Closed(kind) => {
                        self.transport = None;
                        info!(?kind, "conn: transport closed");
                        Event::TransportClosed(kind)
                    }
                },
                () = self.connect_timer.fired() => Event::ConnectTimedOut,
                () = self.reconnect_timer.fired() => Event::ReconnectDue,
            };

            let commands = self.machine.handle(event);
            self.apply(commands).await;
            if event == Event::Teardown {
                break;
            }
        }
        debug!(state = %self.machine.state(), "conn: driver stopped");
    }

    async fn apply(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::OpenTransport => {
                    let connector = Arc::clone(&self.connector);
                    self.dialing = Some(Box::pin(async move { connector.connect().await }));
                }
                Command::ArmConnectTimeout => self.connect_timer.arm(self.settings.connect_timeout),
                Command::CancelConnectTimeout => {
                    self.connect_timer.cancel();
                }
                Command::ScheduleReconnect => self.reconnect_timer.arm(self.settings.reconnect_delay),
                Command::CancelReconnect => {
                    self.reconnect_timer.cancel();
                }
                Command::CloseTransport => {
                    self.dialing = None;
                    if let Some(mut transport) = self.transport.take() {
                        transport.close().await;
                    }
                }
            }
        }
        self.publish();
    }

    fn publish(&self) {
        let next = self.machine.state();
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            info!(state = %next, retry_count = self.machine.retry_count(), "conn: state changed");
        }
    }

    async fn write(&mut self, frame: String) {
        let Some(transport) = self.transport.as_mut() else {
            warn!("conn: dropped outbound frame, no live transport");
            return;
        };
        if let Err(e) = transport.send_text(frame).await {
            warn!(error = %e, "conn: send failed");
        }
    }

    fn deliver(&self, text: &str) {
        match frames::decode(text) {
            Ok(envelope) => {
                let _ = self.inbound_tx.send(envelope);
            }
            Err(e) if e.is_wrong_kind() => debug!(error = %e, "conn: ignored non-chat frame"),
            Err(e) => warn!(error = %e, "conn: dropped invalid frame"),
        }
    }
}

/// Resolves when the pending dial finishes. Pends forever when idle.
async fn dial_result(dialing: &mut Option<DialFuture>) -> Result<Box<dyn Transport>, TransportError> {
    match dialing.as_mut() {
        Some(dial) => {
            let result = dial.await;
            *dialing = None;
            result
        }
        None => std::future::pending().await,
    }
}

async fn next_inbound(transport: &mut Option<Box<dyn Transport>>) -> TransportEvent {
    match transport.as_mut() {
        Some(transport) => transport.next_event().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;
