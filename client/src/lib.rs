//! # client
//!
//! Client side of the broadcast chat: a connection manager that keeps one
//! logical session alive over an unreliable websocket, and a reconciler that
//! merges optimistic local messages with the server's echoes.
//!
//! Everything stateful runs on a single control flow. The manager owns its
//! transport and timers inside one task; the UI talks to it through
//! channels and reads a `watch` signal for the connection state.

pub mod chat;
pub mod config;
pub mod machine;
pub mod manager;
pub mod reconciler;
pub mod timer;
pub mod transport;

pub use chat::{ChatClient, ComposeError, Outbound};
pub use config::{ClientConfig, ConnectionSettings};
pub use machine::{CloseKind, ConnectionMachine, ConnectionState};
pub use manager::{ConnectionManager, SendRejected};
pub use reconciler::{DisplayMessage, Reconciler};
pub use transport::{Connector, Transport, TransportError, TransportEvent, WsConnector};
