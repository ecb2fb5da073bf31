use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout};

// =============================================================================
// SCRIPTED TRANSPORT
// =============================================================================

type DialReply = Result<Box<dyn Transport>, TransportError>;

/// One pending dial. Dropping it fails the dial; holding it stalls the dial.
struct DialRequest {
    reply: oneshot::Sender<DialReply>,
}

impl DialRequest {
    fn accept(self) -> Peer {
        let (transport, peer) = memory_transport();
        assert!(self.reply.send(Ok(transport)).is_ok(), "dial was abandoned");
        peer
    }
}

struct ScriptedConnector {
    dials: mpsc::UnboundedSender<DialRequest>,
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.dials
            .send(DialRequest { reply })
            .map_err(|_| TransportError::Unavailable("script gone".into()))?;
        rx.await
            .unwrap_or_else(|_| Err(TransportError::Unavailable("dial refused".into())))
    }
}

struct MemoryTransport {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    sent: mpsc::UnboundedSender<String>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sent
            .send(text)
            .map_err(|_| TransportError::Unavailable("peer gone".into()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        self.events.recv().await.unwrap_or(TransportEvent::Closed(CloseKind::Abnormal))
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Test side of a [`MemoryTransport`].
struct Peer {
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: mpsc::UnboundedReceiver<String>,
    closes: Arc<AtomicUsize>,
}

impl Peer {
    fn push_text(&self, text: impl Into<String>) {
        self.events.send(TransportEvent::Text(text.into())).expect("transport alive");
    }

    fn close(&self, kind: CloseKind) {
        self.events.send(TransportEvent::Closed(kind)).expect("transport alive");
    }

    fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

fn memory_transport() -> (Box<dyn Transport>, Peer) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let closes = Arc::new(AtomicUsize::new(0));
    let transport = MemoryTransport { events: events_rx, sent: sent_tx, closes: Arc::clone(&closes) };
    (Box::new(transport), Peer { events: events_tx, sent: sent_rx, closes })
}

struct Harness {
    manager: ConnectionManager,
    inbound: mpsc::UnboundedReceiver<ChatEnvelope>,
    state: watch::Receiver<ConnectionState>,
    dials: mpsc::UnboundedReceiver<DialRequest>,
}

fn harness() -> Harness {
    let (dials_tx, dials) = mpsc::unbounded_channel();
    let connector = Arc::new(ScriptedConnector { dials: dials_tx });
    let (manager, inbound) = ConnectionManager::spawn(connector, ConnectionSettings::default());
    let state = manager.subscribe();
    Harness { manager, inbound, state, dials }
}

impl Harness {
    async fn next_dial(&mut self) -> DialRequest {
        timeout(Duration::from_secs(60), self.dials.recv())
            .await
            .expect("dial timed out")
            .expect("connector dropped")
    }

    async fn wait_for(&mut self, want: ConnectionState) {
        timeout(Duration::from_secs(120), self.state.wait_for(|s| *s == want))
            .await
            .expect("state wait timed out")
            .expect("manager dropped");
    }

    async fn open(&mut self) -> Peer {
        let peer = self.next_dial().await.accept();
        self.wait_for(ConnectionState::Open).await;
        peer
    }

    async fn assert_no_dial_for(&mut self, wait: Duration) {
        assert!(timeout(wait, self.dials.recv()).await.is_err(), "unexpected dial");
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn starts_connecting_and_opens() {
    let mut h = harness();
    assert_eq!(h.manager.state(), ConnectionState::Connecting);

    let _peer = h.open().await;

    assert_eq!(h.manager.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn send_is_rejected_until_open() {
    let mut h = harness();
    let envelope = ChatEnvelope::new("ana", "hi");

    assert_eq!(h.manager.send(&envelope), Err(SendRejected::NotOpen(ConnectionState::Connecting)));

    let mut peer = h.open().await;
    h.manager.send(&envelope).expect("open connection accepts sends");

    let frame = timeout(Duration::from_secs(1), peer.sent.recv())
        .await
        .expect("frame timed out")
        .expect("transport dropped");
    assert_eq!(frames::decode(&frame).expect("valid frame"), envelope);
}

#[tokio::test(start_paused = true)]
async fn inbound_chat_frames_are_decoded_and_others_skipped() {
    let mut h = harness();
    let peer = h.open().await;

    peer.push_text("{not json");
    peer.push_text(r#"{"kind":"typing","authorId":"bo"}"#);
    let envelope = ChatEnvelope::new("bo", "hello").with_server_timestamp(1234);
    peer.push_text(frames::encode(&envelope));

    let got = timeout(Duration::from_secs(1), h.inbound.recv())
        .await
        .expect("inbound timed out")
        .expect("manager dropped");
    assert_eq!(got, envelope);
    assert!(h.inbound.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn normal_close_is_terminal() {
    let mut h = harness();
    let peer = h.open().await;

    peer.close(CloseKind::Normal);
    h.wait_for(ConnectionState::Closed).await;

    h.assert_no_dial_for(Duration::from_secs(60)).await;
    assert_eq!(h.manager.state(), ConnectionState::Closed);
    assert_eq!(peer.close_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_reconnects_after_delay() {
    let mut h = harness();
    let peer = h.open().await;

    let closed_at = Instant::now();
    peer.close(CloseKind::Abnormal);
    h.wait_for(ConnectionState::Connecting).await;

    let _peer = h.open().await;
    assert!(closed_at.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_abandons_dial_and_retries() {
    let mut h = harness();
    let stalled = h.next_dial().await;
    let started = Instant::now();

    let retry = h.next_dial().await;

    assert!(stalled.reply.is_closed(), "timed-out dial should be abandoned");
    assert!(started.elapsed() >= Duration::from_secs(13));
    assert_eq!(h.manager.state(), ConnectionState::Connecting);

    let _peer = retry.accept();
    h.wait_for(ConnectionState::Open).await;
}

#[tokio::test(start_paused = true)]
async fn eleventh_consecutive_failure_errors_without_another_dial() {
    let mut h = harness();
    let dials = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dials);
    let mut dial_rx = std::mem::replace(&mut h.dials, mpsc::unbounded_channel().1);
    tokio::spawn(async move {
        while let Some(request) = dial_rx.recv().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(request);
        }
    });

    h.wait_for(ConnectionState::Errored).await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    // One initial dial plus ten reconnects.
    assert_eq!(dials.load(Ordering::SeqCst), 11);
    assert_eq!(h.manager.state(), ConnectionState::Errored);
}

#[tokio::test(start_paused = true)]
async fn successful_open_resets_retry_budget() {
    let mut h = harness();
    for _ in 0..9 {
        drop(h.next_dial().await);
    }
    let peer = h.open().await;

    // Without the reset only one reconnect would remain.
    peer.close(CloseKind::Abnormal);
    for _ in 0..10 {
        drop(h.next_dial().await);
    }
    h.wait_for(ConnectionState::Errored).await;
    h.assert_no_dial_for(Duration::from_secs(60)).await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_live_transport_once() {
    let mut h = harness();
    let peer = h.open().await;

    h.manager.shutdown().await;
    h.manager.shutdown().await;

    assert_eq!(peer.close_count(), 1);
    assert_eq!(h.manager.state(), ConnectionState::Closed);
    assert_eq!(
        h.manager.send(&ChatEnvelope::new("ana", "hi")),
        Err(SendRejected::NotOpen(ConnectionState::Closed))
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_dialing_abandons_dial() {
    let mut h = harness();
    let pending = h.next_dial().await;

    h.manager.shutdown().await;

    assert!(pending.reply.is_closed());
    assert_eq!(h.manager.state(), ConnectionState::Closed);
    assert!(h.dials.recv().await.is_none(), "driver should release the connector");
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_waiting_cancels_reconnect() {
    let mut h = harness();
    let peer = h.open().await;
    peer.close(CloseKind::Abnormal);
    h.wait_for(ConnectionState::Connecting).await;

    h.manager.shutdown().await;

    assert!(h.dials.recv().await.is_none(), "no reconnect after teardown");
    assert_eq!(h.manager.state(), ConnectionState::Closed);
    assert_eq!(peer.close_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_tears_down() {
    let mut h = harness();
    let peer = h.open().await;

    drop(h.manager);

    assert!(
        timeout(Duration::from_secs(1), h.dials.recv()).await.expect("driver should stop").is_none()
    );
    assert_eq!(peer.close_count(), 1);
    assert_eq!(*h.state.borrow(), ConnectionState::Closed);
}
