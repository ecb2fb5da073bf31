//! Transport seam between the connection manager and the socket.
//!
//! The manager only sees [`Connector`] and [`Transport`]; production code
//! plugs in [`WsConnector`], tests plug in scripted in-memory transports.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::machine::CloseKind;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket connect failed: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket send failed: {0}")]
    Send(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// What the transport reported since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// The transport is finished. No further events follow.
    Closed(CloseKind),
}

/// One live connection.
#[async_trait]
pub trait Transport: Send {
    /// Write one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the frame could not be written.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Wait for the next inbound event. Must be cancel-safe.
    async fn next_event(&mut self) -> TransportEvent;

    /// Close with the normal close indicator. Called at most once.
    async fn close(&mut self);
}

/// Dials new transports to a fixed address.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one transport.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the dial fails.
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;
}

// =============================================================================
// WEBSOCKET
// =============================================================================

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(Box::new(e)))?;
        debug!(url = %self.url, "ws: connected");
        Ok(Box::new(WsTransport { stream }))
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsTransport {
    stream: WsStream,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| TransportError::Send(Box::new(e)))
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Text(text.as_str().to_owned()),
                Some(Ok(Message::Close(frame))) => return TransportEvent::Closed(close_kind(frame.as_ref())),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "ws: read failed");
                    return TransportEvent::Closed(CloseKind::Abnormal);
                }
                None => return TransportEvent::Closed(CloseKind::Abnormal),
            }
        }
    }

    async fn close(&mut self) {
        let frame = CloseFrame { code: CloseCode::Normal, reason: "".into() };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!(error = %e, "ws: close handshake failed");
        }
    }
}

/// Only the normal close code counts as an intentional close. A close frame
/// without a code is abnormal.
pub(crate) fn close_kind(frame: Option<&CloseFrame>) -> CloseKind {
    match frame {
        Some(frame) if frame.code == CloseCode::Normal => CloseKind::Normal,
        _ => CloseKind::Abnormal,
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
