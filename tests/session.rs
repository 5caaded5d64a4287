//! Stream session tests against an in-process WebSocket server.
//!
//! # Running
//!
//! ```bash
//! cargo test --test session
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use qe_connector::client::websocket::{
    BoxSocket, Dialer, Event, SessionConfig, SessionState, TungsteniteDialer, WebSocketSession,
};
use qe_connector::error::EnvelopeLayer;
use qe_connector::Error;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HandshakeRequest, Response as HandshakeResponse,
};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

struct ServerConn {
    uri: String,
    ws: WebSocketStream<TcpStream>,
}

/// Start a server that hands every accepted connection to the test
async fn start_server() -> (String, UnboundedReceiver<ServerConn>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let captured = Arc::new(Mutex::new(String::new()));
            let sink = Arc::clone(&captured);
            let callback = move |req: &HandshakeRequest,
                                 resp: HandshakeResponse|
                  -> Result<HandshakeResponse, ErrorResponse> {
                *sink.lock() = req.uri().to_string();
                Ok(resp)
            };
            if let Ok(ws) = accept_hdr_async(stream, callback).await {
                let uri = captured.lock().clone();
                if tx.send(ServerConn { uri, ws }).is_err() {
                    break;
                }
            }
        }
    });

    (format!("ws://{}", addr), rx)
}

fn quiet_config() -> SessionConfig {
    SessionConfig::new()
        .reconnect_delay(Duration::from_millis(100))
        .ping_interval(Duration::from_secs(30))
        .pong_timeout(Duration::from_secs(30))
}

fn session_with(
    url: &str,
    config: SessionConfig,
) -> (WebSocketSession, UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WebSocketSession::with_config(url, tx, config), rx)
}

fn push(kind: &str, data: &str) -> String {
    json!({ "type": kind, "messageId": "m1", "userId": "u1", "data": data }).to_string()
}

async fn next_event(rx: &mut UnboundedReceiver<Event>) -> Event {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("handler channel closed")
}

async fn next_conn(rx: &mut UnboundedReceiver<ServerConn>) -> ServerConn {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for connection")
        .expect("server stopped")
}

async fn wait_for_state(session: &WebSocketSession, state: SessionState) {
    timeout(WAIT, async {
        while session.state() != state {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never reached {:?}", state));
}

async fn send_text(conn: &mut ServerConn, text: &str) {
    conn.ws.send(Message::Text(text.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_connect_delivers_events_in_order() {
    let (url, mut conns) = start_server().await;
    let (session, mut events) = session_with(&url, quiet_config());

    session.connect("lk-1").await.unwrap();
    let mut conn = next_conn(&mut conns).await;
    assert_eq!(conn.uri, "/api/ws?listen_key=lk-1");
    assert!(session.is_connected());
    assert_eq!(session.stream_key().as_deref(), Some("lk-1"));

    assert!(matches!(next_event(&mut events).await, Event::Connected));

    let fill = r#"{"type":"fill","order_id":"o1","symbol":"BTCUSDT","filled_qty":1.5}"#;
    send_text(&mut conn, &push("order_data", fill)).await;

    match next_event(&mut events).await {
        Event::Raw(envelope) => {
            assert_eq!(envelope.kind, "order_data");
            assert_eq!(envelope.message_id, "m1");
        }
        other => panic!("expected raw envelope, got {:?}", other),
    }
    match next_event(&mut events).await {
        Event::Fill(fill) => {
            assert_eq!(fill.order_id, "o1");
            assert!((fill.filled_qty - 1.5).abs() < f64::EPSILON);
        }
        other => panic!("expected fill, got {:?}", other),
    }

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_decode_failure_keeps_connection() {
    let (url, mut conns) = start_server().await;
    let (session, mut events) = session_with(&url, quiet_config());

    session.connect("lk").await.unwrap();
    let mut conn = next_conn(&mut conns).await;
    assert!(matches!(next_event(&mut events).await, Event::Connected));

    send_text(&mut conn, "not json").await;
    match next_event(&mut events).await {
        Event::DecodeFailed(e) => assert_eq!(e.layer, EnvelopeLayer::Outer),
        other => panic!("expected decode failure, got {:?}", other),
    }

    send_text(&mut conn, &push("master_data", "{broken")).await;
    assert!(matches!(next_event(&mut events).await, Event::Raw(_)));
    match next_event(&mut events).await {
        Event::DecodeFailed(e) => assert_eq!(e.layer, EnvelopeLayer::Inner),
        other => panic!("expected decode failure, got {:?}", other),
    }

    assert_eq!(session.state(), SessionState::Connected);
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_inner_kind_is_dropped() {
    let (url, mut conns) = start_server().await;
    let (session, mut events) = session_with(&url, quiet_config());

    session.connect("lk").await.unwrap();
    let mut conn = next_conn(&mut conns).await;
    assert!(matches!(next_event(&mut events).await, Event::Connected));

    send_text(&mut conn, &push("order_data", r#"{"type":"unknown_kind"}"#)).await;
    send_text(&mut conn, &push("status", "alive")).await;

    let mut seen = Vec::new();
    loop {
        let event = next_event(&mut events).await;
        let done = matches!(event, Event::Status(_));
        seen.push(event);
        if done {
            break;
        }
    }

    let raw = seen.iter().filter(|e| matches!(e, Event::Raw(_))).count();
    assert_eq!(raw, 2);
    assert!(!seen.iter().any(|e| matches!(
        e,
        Event::Order(_) | Event::Fill(_) | Event::MasterOrder(_) | Event::DecodeFailed(_)
    )));
    match seen.last() {
        Some(Event::Status(data)) => assert_eq!(data, "alive"),
        other => panic!("expected status, got {:?}", other),
    }

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_pong_frame_triggers_reconnect() {
    let (url, mut conns) = start_server().await;
    let (session, mut events) = session_with(&url, quiet_config());

    session.connect("lk-pong").await.unwrap();
    let mut first = next_conn(&mut conns).await;
    assert!(matches!(next_event(&mut events).await, Event::Connected));

    send_text(&mut first, "pong").await;
    assert!(matches!(next_event(&mut events).await, Event::Disconnected));

    let second = next_conn(&mut conns).await;
    assert_eq!(second.uri, "/api/ws?listen_key=lk-pong");
    assert!(matches!(next_event(&mut events).await, Event::Connected));
    wait_for_state(&session, SessionState::Connected).await;

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_pong_frame_tolerated_when_disabled() {
    let (url, mut conns) = start_server().await;
    let (session, mut events) =
        session_with(&url, quiet_config().pong_frame_disconnects(false));

    session.connect("lk").await.unwrap();
    let mut conn = next_conn(&mut conns).await;
    assert!(matches!(next_event(&mut events).await, Event::Connected));

    send_text(&mut conn, "pong").await;
    send_text(&mut conn, &push("status", "still here")).await;

    // "pong" is not JSON, so it surfaces as a decode failure instead
    assert!(matches!(next_event(&mut events).await, Event::DecodeFailed(_)));
    assert!(matches!(next_event(&mut events).await, Event::Raw(_)));
    assert!(matches!(next_event(&mut events).await, Event::Status(_)));
    assert!(session.is_connected());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_server_drop_triggers_reconnect() {
    let (url, mut conns) = start_server().await;
    let (session, mut events) = session_with(&url, quiet_config());

    session.connect("lk").await.unwrap();
    let first = next_conn(&mut conns).await;
    assert!(matches!(next_event(&mut events).await, Event::Connected));

    drop(first);
    assert!(matches!(next_event(&mut events).await, Event::Disconnected));

    let mut second = next_conn(&mut conns).await;
    assert!(matches!(next_event(&mut events).await, Event::Connected));

    send_text(&mut second, &push("status", "back")).await;
    assert!(matches!(next_event(&mut events).await, Event::Raw(_)));
    assert!(matches!(next_event(&mut events).await, Event::Status(_)));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_silent_server_hits_liveness_deadline() {
    let (url, mut conns) = start_server().await;
    let config = quiet_config()
        .pong_timeout(Duration::from_millis(300))
        .reconnect_delay(Duration::from_secs(30));
    let (session, mut events) = session_with(&url, config);

    session.connect("lk").await.unwrap();
    let _conn = next_conn(&mut conns).await;
    assert!(matches!(next_event(&mut events).await, Event::Connected));

    assert!(matches!(next_event(&mut events).await, Event::Disconnected));
    wait_for_state(&session, SessionState::Reconnecting).await;

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_client_sends_pings() {
    let (url, mut conns) = start_server().await;
    let config = quiet_config().ping_interval(Duration::from_millis(50));
    let (session, _events) = session_with(&url, config);

    session.connect("lk").await.unwrap();
    let mut conn = next_conn(&mut conns).await;

    let frame = timeout(WAIT, conn.ws.next())
        .await
        .expect("no frame from client")
        .expect("client stream ended")
        .unwrap();
    assert!(matches!(frame, Message::Ping(_)));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_first_connect_failure_is_not_retried() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (session, mut events) = session_with(&format!("ws://{}", addr), quiet_config());
    let err = session.connect("lk").await.unwrap_err();
    assert!(err.is_transport(), "unexpected error: {:?}", err);
    assert_eq!(session.state(), SessionState::Disconnected);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_connect_requires_disconnected_state() {
    let (url, mut conns) = start_server().await;
    let (session, _events) = session_with(&url, quiet_config());

    session.connect("lk").await.unwrap();
    let _conn = next_conn(&mut conns).await;

    match session.connect("other").await {
        Err(Error::InvalidState { from, to }) => {
            assert_eq!(from, SessionState::Connected);
            assert_eq!(to, SessionState::Connecting);
        }
        other => panic!("expected invalid state, got {:?}", other),
    }
    assert_eq!(session.stream_key().as_deref(), Some("lk"));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent_and_final() {
    let (url, mut conns) = start_server().await;
    let (session, mut events) = session_with(&url, quiet_config());

    session.connect("lk").await.unwrap();
    let conn = next_conn(&mut conns).await;
    assert!(matches!(next_event(&mut events).await, Event::Connected));

    session.close().await.unwrap();
    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);

    drop(conn);
    sleep(Duration::from_millis(300)).await;

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, Event::Disconnected | Event::Connected),
            "unexpected event after close: {:?}",
            event
        );
    }
    assert!(matches!(session.connect("lk").await, Err(Error::Closed)));
    assert!(timeout(Duration::from_millis(300), conns.recv()).await.is_err());
}

#[tokio::test]
async fn test_binary_text_frames_are_decoded() {
    let (url, mut conns) = start_server().await;
    let (session, mut events) = session_with(&url, quiet_config());

    session.connect("lk").await.unwrap();
    let mut conn = next_conn(&mut conns).await;
    assert!(matches!(next_event(&mut events).await, Event::Connected));

    let frame = push("status", "binary ok").into_bytes();
    conn.ws.send(Message::Binary(frame)).await.unwrap();

    assert!(matches!(next_event(&mut events).await, Event::Raw(_)));
    match next_event(&mut events).await {
        Event::Status(data) => assert_eq!(data, "binary ok"),
        other => panic!("expected status, got {:?}", other),
    }

    conn.ws.send(Message::Binary(vec![0xff, 0xfe, 0x00])).await.unwrap();
    send_text(&mut conn, &push("status", "after")).await;
    assert!(matches!(next_event(&mut events).await, Event::Raw(_)));
    assert!(matches!(next_event(&mut events).await, Event::Status(_)));
    assert!(session.is_connected());

    session.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 6)]
async fn test_slow_handlers_do_not_block_reads_and_close_joins_them() {
    let (url, mut conns) = start_server().await;
    let started = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let handler = {
        let started = Arc::clone(&started);
        let completed = Arc::clone(&completed);
        move |event: Event| {
            if let Event::Status(_) = event {
                started.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(500));
                completed.fetch_add(1, Ordering::SeqCst);
            }
        }
    };
    let session = WebSocketSession::with_config(url, handler, quiet_config());

    session.connect("lk").await.unwrap();
    let mut conn = next_conn(&mut conns).await;

    for n in 0..3 {
        send_text(&mut conn, &push("status", &format!("tick {}", n))).await;
    }

    // Inline dispatch would need 500ms before a second handler could start
    let overlapping = timeout(Duration::from_millis(250), async {
        while started.load(Ordering::SeqCst) < 3 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(overlapping.is_ok(), "reads were blocked behind a slow handler");
    assert!(completed.load(Ordering::SeqCst) < 3);

    session.close().await.unwrap();
    assert_eq!(started.load(Ordering::SeqCst), 3);
    assert_eq!(completed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_close_interrupts_reconnect_backoff() {
    let (url, mut conns) = start_server().await;
    let config = quiet_config().reconnect_delay(Duration::from_secs(60));
    let (session, mut events) = session_with(&url, config);

    session.connect("lk").await.unwrap();
    let conn = next_conn(&mut conns).await;
    assert!(matches!(next_event(&mut events).await, Event::Connected));

    drop(conn);
    assert!(matches!(next_event(&mut events).await, Event::Disconnected));
    wait_for_state(&session, SessionState::Reconnecting).await;

    timeout(Duration::from_secs(2), session.close())
        .await
        .expect("close blocked on the reconnect backoff")
        .unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

/// Fails a fixed number of dials after the first one
struct FlakyDialer {
    inner: TungsteniteDialer,
    dials: AtomicUsize,
    failures: usize,
    attempts: Arc<Mutex<Vec<Instant>>>,
}

#[async_trait]
impl Dialer for FlakyDialer {
    async fn dial(&self, url: &str) -> Result<BoxSocket, Error> {
        self.attempts.lock().push(Instant::now());
        let n = self.dials.fetch_add(1, Ordering::SeqCst);
        if n >= 1 && n <= self.failures {
            return Err(Error::Config("simulated dial failure".to_string()));
        }
        self.inner.dial(url).await
    }
}

#[tokio::test]
async fn test_reconnect_waits_between_attempts() {
    let (url, mut conns) = start_server().await;
    let delay = Duration::from_millis(100);
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let dialer = FlakyDialer {
        inner: TungsteniteDialer,
        dials: AtomicUsize::new(0),
        failures: 2,
        attempts: Arc::clone(&attempts),
    };

    let (tx, mut events) = mpsc::unbounded_channel();
    let session = WebSocketSession::with_dialer(
        url,
        move |event: Event| {
            let _ = tx.send(event);
        },
        quiet_config().reconnect_delay(delay),
        dialer,
    );

    session.connect("lk").await.unwrap();
    let first = next_conn(&mut conns).await;
    assert!(matches!(next_event(&mut events).await, Event::Connected));

    drop(first);
    assert!(matches!(next_event(&mut events).await, Event::Disconnected));
    let _second = next_conn(&mut conns).await;
    assert!(matches!(next_event(&mut events).await, Event::Connected));
    assert!(session.is_connected());

    let attempts = attempts.lock().clone();
    assert_eq!(attempts.len(), 4);
    for pair in attempts[1..].windows(2) {
        assert!(pair[1] - pair[0] >= delay, "attempts closer than the backoff");
    }

    session.close().await.unwrap();
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, Event::Connected | Event::Disconnected));
    }
}
