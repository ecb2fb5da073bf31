use crate::config::ServerConfig;
use crate::routes;
use crate::state::AppState;
use frames::{ChatEnvelope, MAX_TEXT_LEN};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Duration, sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (SocketAddr, AppState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let state = AppState::new(ServerConfig::default());
    tokio::spawn(routes::serve(listener, state.clone(), std::future::pending()));
    (addr, state)
}

async fn connect(addr: SocketAddr, path: &str) -> Client {
    let (stream, _) = connect_async(format!("ws://{addr}{path}")).await.expect("ws connect");
    stream
}

async fn wait_for_members(state: &AppState, expected: usize) {
    timeout(Duration::from_secs(2), async {
        while state.hub.member_count() != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("member count never settled");
}

async fn recv_envelope(client: &mut Client) -> ChatEnvelope {
    loop {
        let msg = timeout(Duration::from_millis(500), client.next())
            .await
            .expect("receive timed out")
            .expect("stream ended")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return frames::decode(text.as_str()).expect("server frames decode");
        }
    }
}

async fn assert_nothing_received(client: &mut Client) {
    assert!(
        timeout(Duration::from_millis(100), client.next()).await.is_err(),
        "expected no frame"
    );
}

async fn send_text(client: &mut Client, text: String) {
    client.send(Message::text(text)).await.expect("ws send");
}

#[tokio::test]
async fn broadcast_reaches_every_client_including_sender() {
    let (addr, state) = start_server().await;
    let mut alice = connect(addr, "/").await;
    let mut bob = connect(addr, "/ws").await;
    wait_for_members(&state, 2).await;

    let before = frames::now_ms();
    send_text(&mut alice, frames::encode(&ChatEnvelope::new(" alice ", "hello bob").with_server_timestamp(1))).await;

    for client in [&mut alice, &mut bob] {
        let got = recv_envelope(client).await;
        assert_eq!(got.author_id, "alice");
        assert_eq!(got.text, "hello bob");
        assert!(got.server_timestamp >= before);
    }
}

#[tokio::test]
async fn invalid_frames_are_dropped_silently() {
    let (addr, state) = start_server().await;
    let mut alice = connect(addr, "/").await;
    let mut bob = connect(addr, "/").await;
    wait_for_members(&state, 2).await;

    send_text(&mut alice, "not json".to_owned()).await;
    send_text(&mut alice, r#"{"kind":"ping"}"#.to_owned()).await;
    send_text(&mut alice, r#"{"kind":"chat-message","authorId":123,"text":"x"}"#.to_owned()).await;
    send_text(&mut alice, frames::encode(&ChatEnvelope::new("alice", "x".repeat(MAX_TEXT_LEN + 1)))).await;

    assert_nothing_received(&mut bob).await;
    assert_eq!(state.hub.member_count(), 2);

    // The offending connection is still a member and can keep chatting.
    send_text(&mut alice, frames::encode(&ChatEnvelope::new("alice", "still here"))).await;
    assert_eq!(recv_envelope(&mut bob).await.text, "still here");
}

#[tokio::test]
async fn all_clients_see_the_same_order() {
    let (addr, state) = start_server().await;
    let mut alice = connect(addr, "/").await;
    let mut bob = connect(addr, "/").await;
    let mut carol = connect(addr, "/").await;
    wait_for_members(&state, 3).await;

    for n in 0..5 {
        send_text(&mut alice, frames::encode(&ChatEnvelope::new("alice", format!("a{n}")))).await;
        send_text(&mut bob, frames::encode(&ChatEnvelope::new("bob", format!("b{n}")))).await;
    }

    let mut seen = Vec::new();
    for client in [&mut alice, &mut bob, &mut carol] {
        let mut texts = Vec::new();
        for _ in 0..10 {
            texts.push(recv_envelope(client).await.text);
        }
        seen.push(texts);
    }
    assert_eq!(seen[0], seen[1]);
    assert_eq!(seen[1], seen[2]);
}

#[tokio::test]
async fn disconnect_removes_member() {
    let (addr, state) = start_server().await;
    let mut alice = connect(addr, "/").await;
    let bob = connect(addr, "/").await;
    wait_for_members(&state, 2).await;

    drop(bob);
    wait_for_members(&state, 1).await;

    alice.close(None).await.expect("close");
    wait_for_members(&state, 0).await;
}

#[tokio::test]
async fn healthz_returns_ok() {
    let (addr, _state) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.expect("tcp connect");
    stream
        .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .expect("write request");

    let mut response = String::new();
    timeout(Duration::from_secs(2), stream.read_to_string(&mut response))
        .await
        .expect("response timed out")
        .expect("read response");
    assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {response}");
}
