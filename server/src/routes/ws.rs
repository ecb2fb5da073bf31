//! WebSocket handler: relays frames between one socket and the hub.
//!
//! DESIGN
//! ======
//! On upgrade, opens a `Session` (which joins the hub with this connection's
//! outbound queue) and enters a `select!` loop:
//! - Incoming text frames → `Session::on_text` → hub ingest + fan-out
//! - Frames queued by the hub → written to the socket
//!
//! The session never replies to the sender with errors. Invalid frames are
//! logged by the hub and dropped.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → session opens, member joins
//! 2. Text frames → ingest; hub frames → socket
//! 3. Close, socket error, write failure, or hub eviction → loop ends
//! 4. Session closes → member leaves (exactly once)

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::hub::SharedFrame;
use crate::session::Session;
use crate::state::AppState;

pub async fn handle_ws(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state, addr))
}

async fn run_ws(mut socket: WebSocket, state: AppState, addr: SocketAddr) {
    // Per-connection queue the hub writes broadcast frames into.
    let (member_tx, mut member_rx) = mpsc::channel::<SharedFrame>(state.config.member_queue);
    let mut session = Session::open(state.hub.clone(), member_tx);
    let connection_id = session.id();

    info!(%connection_id, %addr, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(%connection_id, error = %e, "ws: socket error");
                        break;
                    }
                };
                match msg {
                    Message::Text(text) => {
                        session.on_text(text.as_str());
                    }
                    Message::Binary(_) => debug!(%connection_id, "ws: ignored binary frame"),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            frame = member_rx.recv() => {
                // The hub dropped our sink: this member was evicted.
                let Some(frame) = frame else { break };
                if let Err(e) = socket.send(Message::Text(String::from(&*frame).into())).await {
                    warn!(%connection_id, error = %e, "ws: send failed");
                    break;
                }
            }
        }
    }

    session.close();
    info!(%connection_id, "ws: client disconnected");
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
