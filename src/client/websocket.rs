//! Self-healing user event stream.
//!
//! [`WebSocketSession`] owns at most one physical connection at a time and
//! walks this state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected -> Reconnecting -> Connecting -> ...
//!                                     any state -> Closed (terminal)
//! ```
//!
//! Every inbound text frame goes through the two-pass
//! [`decoder`](crate::client::decoder) on the read loop, in receipt order.
//! The decoded events are then handed to the [`EventHandler`] on a separate
//! task, so a slow handler never stalls the next read. Handlers may run
//! concurrently with each other; consumers that need per-symbol ordering
//! must serialize inside their handler.
//!
//! Once connected, any read failure (including an expired liveness
//! deadline) drops the connection and starts a fixed-delay reconnect loop
//! that retries until [`WebSocketSession::close`] is called. The first
//! [`connect`](WebSocketSession::connect) is never retried.
//!
//! # Example
//!
//! ```rust,no_run
//! use qe_connector::client::websocket::{Event, WebSocketSession};
//! use qe_connector::{Config, QeClient};
//!
//! # async fn example() -> qe_connector::Result<()> {
//! let client = QeClient::new(Config::new("api-key", "secret-key"))?;
//! let listen_key = client.rest().create_listen_key().await?;
//!
//! let session = client.websocket(|event: Event| match event {
//!     Event::Fill(fill) => println!("fill {} {}", fill.order_id, fill.filled_qty),
//!     Event::DecodeFailed(e) => eprintln!("bad frame: {}", e),
//!     _ => {}
//! });
//! session.connect(listen_key.listen_key).await?;
//! // ...
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{interval_at, sleep, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::decoder::{self, PushEvent};
use crate::error::{DecodeError, Error};
use crate::types::messages::{FillEvent, MasterOrderEvent, OrderEvent, PushEnvelope};

/// Text frame some servers send as a liveness answer
const PONG_FRAME: &str = "pong";

/// Upper bound on the close handshake when tearing a connection down
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// A duplex WebSocket message stream
pub trait Socket:
    Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin
{
}

impl<T> Socket for T where
    T: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin
{
}

/// Boxed physical connection
pub type BoxSocket = Box<dyn Socket>;

/// Opens physical connections
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Open a connection to `url`
    async fn dial(&self, url: &str) -> Result<BoxSocket, Error>;
}

/// Default dialer backed by `tokio_tungstenite::connect_async`
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteDialer;

#[async_trait]
impl Dialer for TungsteniteDialer {
    async fn dial(&self, url: &str) -> Result<BoxSocket, Error> {
        let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
        Ok(Box::new(stream))
    }
}

/// Everything a session reports to its handler
#[derive(Debug, Clone)]
pub enum Event {
    /// A physical connection was established
    Connected,
    /// The physical connection was lost
    Disconnected,
    /// Outer envelope of every frame that decoded, before classification
    Raw(PushEnvelope),
    /// `status` message
    Status(String),
    /// `error` message from the server
    ServerError(String),
    /// Master order update
    MasterOrder(MasterOrderEvent),
    /// Child order update
    Order(OrderEvent),
    /// Fill notification
    Fill(FillEvent),
    /// A frame failed to decode; the connection stays up
    DecodeFailed(DecodeError),
}

impl Event {
    /// Map a decoder result to an event; unrecognized kinds map to nothing
    pub fn from_push(event: PushEvent) -> Option<Self> {
        match event {
            PushEvent::Status(data) => Some(Event::Status(data)),
            PushEvent::ServerError(message) => Some(Event::ServerError(message)),
            PushEvent::MasterOrder(order) => Some(Event::MasterOrder(order)),
            PushEvent::Order(order) => Some(Event::Order(order)),
            PushEvent::Fill(fill) => Some(Event::Fill(fill)),
            PushEvent::Unrecognized { .. } => None,
        }
    }
}

/// Receives session events
///
/// Called from background tasks; implementations should return quickly and
/// hand heavy work off elsewhere. Any `Fn(Event)` closure is a handler, and
/// so is an unbounded channel sender.
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event
    fn handle(&self, event: Event);
}

impl<F> EventHandler for F
where
    F: Fn(Event) + Send + Sync + 'static,
{
    fn handle(&self, event: Event) {
        self(event)
    }
}

impl EventHandler for UnboundedSender<Event> {
    fn handle(&self, event: Event) {
        if self.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

/// Lifecycle state of a [`WebSocketSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection and no reconnect pending
    Disconnected,
    /// Dialing
    Connecting,
    /// A physical connection is live
    Connected,
    /// Waiting out the backoff before the next dial
    Reconnecting,
    /// Terminal
    Closed,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Disconnected, Connecting) | (Disconnected, Reconnecting) => true,
            (Connecting, Connected) | (Connecting, Disconnected) | (Connecting, Reconnecting) => {
                true
            }
            (Connected, Disconnected) => true,
            (Reconnecting, Connecting) => true,
            _ => false,
        }
    }
}

/// Timing knobs of a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed delay before every reconnect attempt
    pub reconnect_delay: Duration,
    /// Interval between outgoing pings
    pub ping_interval: Duration,
    /// Liveness deadline, refreshed by every inbound frame
    pub pong_timeout: Duration,
    /// Whether a literal `"pong"` text frame ends the connection
    pub pong_frame_disconnects: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            ping_interval: Duration::from_secs(1),
            pong_timeout: Duration::from_secs(10),
            pong_frame_disconnects: true,
        }
    }
}

impl SessionConfig {
    /// Create a session config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reconnect delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the ping interval
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the liveness deadline
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    /// Choose whether a `"pong"` text frame ends the connection
    pub fn pong_frame_disconnects(mut self, enabled: bool) -> Self {
        self.pong_frame_disconnects = enabled;
        self
    }
}

#[derive(Debug)]
struct ConnectionHandle {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct Slot {
    state: SessionState,
    stream_key: Option<String>,
    connection: Option<ConnectionHandle>,
}

impl Slot {
    /// The only place `state` and `connection` change.
    ///
    /// Leaving `Connected` cancels the live connection; entering it installs
    /// `connection`. A rejected transition cancels the offered connection.
    fn transition(
        &mut self,
        to: SessionState,
        connection: Option<ConnectionHandle>,
    ) -> Result<SessionState, Error> {
        let from = self.state;
        let rejected = if from == SessionState::Closed {
            Some(Error::Closed)
        } else if !from.can_transition_to(to) {
            Some(Error::InvalidState { from, to })
        } else {
            None
        };
        if let Some(err) = rejected {
            if let Some(offered) = connection {
                offered.cancel.cancel();
            }
            return Err(err);
        }

        if let Some(previous) = self.connection.take() {
            previous.cancel.cancel();
        }
        if to == SessionState::Connected {
            self.connection = connection;
        } else if let Some(offered) = connection {
            offered.cancel.cancel();
        }
        self.state = to;
        debug!(?from, ?to, "session state changed");
        Ok(from)
    }
}

enum LoopExit {
    Cancelled,
    PongFrame,
    Failed(Error),
}

struct Inner {
    base_url: String,
    config: SessionConfig,
    dialer: Arc<dyn Dialer>,
    handler: Arc<dyn EventHandler>,
    slot: Mutex<Slot>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    next_connection_id: AtomicU64,
}

/// Persistent, auto-recovering user event stream
///
/// The handler is fixed at construction and shared read-only by every
/// background task.
pub struct WebSocketSession {
    inner: Arc<Inner>,
}

impl fmt::Debug for WebSocketSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.lock();
        f.debug_struct("WebSocketSession")
            .field("base_url", &self.inner.base_url)
            .field("state", &slot.state)
            .field("connection_id", &slot.connection.as_ref().map(|c| c.id))
            .field("config", &self.inner.config)
            .finish()
    }
}

impl WebSocketSession {
    /// Create a session with default timing
    ///
    /// `base_url` is the stream host, e.g. `wss://api.quantumexecute.com`.
    pub fn new(base_url: impl Into<String>, handler: impl EventHandler) -> Self {
        Self::with_config(base_url, handler, SessionConfig::default())
    }

    /// Create a session with custom timing
    pub fn with_config(
        base_url: impl Into<String>,
        handler: impl EventHandler,
        config: SessionConfig,
    ) -> Self {
        Self::with_dialer(base_url, handler, config, TungsteniteDialer)
    }

    /// Create a session that opens connections through `dialer`
    pub fn with_dialer(
        base_url: impl Into<String>,
        handler: impl EventHandler,
        config: SessionConfig,
        dialer: impl Dialer,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                base_url: base_url.into(),
                config,
                dialer: Arc::new(dialer),
                handler: Arc::new(handler),
                slot: Mutex::new(Slot {
                    state: SessionState::Disconnected,
                    stream_key: None,
                    connection: None,
                }),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
                next_connection_id: AtomicU64::new(1),
            }),
        }
    }

    /// Connect using `stream_key` (the listen key)
    ///
    /// Only valid while disconnected. A failure is returned as-is and the
    /// session goes back to [`SessionState::Disconnected`]; only drops after
    /// a successful connect are retried automatically.
    pub async fn connect(&self, stream_key: impl Into<String>) -> Result<(), Error> {
        {
            let mut slot = self.inner.slot.lock();
            slot.transition(SessionState::Connecting, None)?;
            slot.stream_key = Some(stream_key.into());
        }

        match self.inner.open().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut slot = self.inner.slot.lock();
                if slot.state == SessionState::Connecting {
                    slot.transition(SessionState::Disconnected, None)?;
                }
                Err(e)
            }
        }
    }

    /// Close the session and wait for every background task to finish
    ///
    /// Stops the reconnect loop, the read loop and any in-flight handler
    /// dispatch. Calling it again is a no-op.
    pub async fn close(&self) -> Result<(), Error> {
        let previous = {
            let mut slot = self.inner.slot.lock();
            let from = slot.state;
            if from != SessionState::Closed {
                slot.transition(SessionState::Closed, None)?;
            }
            from
        };

        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        if previous != SessionState::Closed {
            info!(from = ?previous, "session closed");
        }
        Ok(())
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.inner.slot.lock().state
    }

    /// Whether a physical connection is live
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Stream key of the last `connect` call
    pub fn stream_key(&self) -> Option<String> {
        self.inner.slot.lock().stream_key.clone()
    }

    /// Timing configuration
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl Drop for WebSocketSession {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
    }
}

impl Inner {
    /// Dial the stored stream key and, if the session still wants it,
    /// install the connection and start its read loop.
    async fn open(self: &Arc<Self>) -> Result<(), Error> {
        let url = {
            let slot = self.slot.lock();
            stream_url(&self.base_url, slot.stream_key.as_deref().unwrap_or_default())?
        };
        debug!(base_url = %self.base_url, "dialing stream");

        let socket = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(Error::Closed),
            result = self.dialer.dial(url.as_str()) => result?,
        };

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        let rejected = {
            let mut slot = self.slot.lock();
            let handle = ConnectionHandle {
                id,
                cancel: cancel.clone(),
            };
            let outcome = slot.transition(SessionState::Connected, Some(handle));
            match outcome {
                Ok(_) => {
                    // Spawned under the lock so a concurrent close() cannot
                    // finish waiting before this task is tracked.
                    self.tasks
                        .spawn(Arc::clone(self).read_loop(id, socket, cancel));
                    None
                }
                Err(e) => Some((e, socket)),
            }
        };

        if let Some((e, mut socket)) = rejected {
            let _ = timeout(CLOSE_GRACE, socket.close()).await;
            return Err(e);
        }
        info!(connection_id = id, "stream connected");
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, id: u64, mut socket: BoxSocket, cancel: CancellationToken) {
        self.handler.handle(Event::Connected);

        let pong_timeout = self.config.pong_timeout;
        let ping_interval = self.config.ping_interval;
        let mut deadline = Instant::now() + pong_timeout;
        let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break LoopExit::Cancelled,
                _ = sleep_until(deadline) => break LoopExit::Failed(Error::Timeout),
                _ = ping.tick() => {
                    if let Err(e) = socket.send(Message::Ping(Vec::new())).await {
                        break LoopExit::Failed(e.into());
                    }
                }
                frame = socket.next() => {
                    let message = match frame {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => break LoopExit::Failed(e.into()),
                        None => break LoopExit::Failed(WsError::ConnectionClosed.into()),
                    };
                    deadline = Instant::now() + pong_timeout;

                    match message {
                        Message::Text(text) => {
                            if text == PONG_FRAME && self.config.pong_frame_disconnects {
                                break LoopExit::PongFrame;
                            }
                            self.dispatch(&text);
                        }
                        Message::Close(frame) => {
                            debug!(connection_id = id, ?frame, "server closed the stream");
                            break LoopExit::Failed(WsError::ConnectionClosed.into());
                        }
                        Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                            Ok(text) => self.dispatch(text),
                            Err(e) => {
                                debug!(connection_id = id, error = %e, "dropping non-UTF-8 binary frame");
                            }
                        },
                        Message::Ping(_)
                        | Message::Pong(_)
                        | Message::Frame(_) => {}
                    }
                }
            }
        };

        let _ = timeout(CLOSE_GRACE, socket.close()).await;

        match exit {
            LoopExit::Cancelled => debug!(connection_id = id, "read loop stopped"),
            LoopExit::PongFrame => {
                warn!(connection_id = id, "pong frame received, dropping connection");
                self.handle_disconnect(id);
            }
            LoopExit::Failed(e) => {
                warn!(connection_id = id, error = %e, "stream read failed");
                self.handle_disconnect(id);
            }
        }
    }

    /// Decode on the read path, hand the results off to a dispatch task.
    fn dispatch(&self, text: &str) {
        let mut events = Vec::with_capacity(2);

        match decoder::parse_envelope(text) {
            Ok(envelope) => {
                let classified = decoder::classify(&envelope);
                events.push(Event::Raw(envelope));
                match classified {
                    Ok(PushEvent::Unrecognized { kind, inner_kind }) => {
                        debug!(kind = %kind, inner_kind = ?inner_kind, "ignoring unrecognized push message");
                    }
                    Ok(event) => events.extend(Event::from_push(event)),
                    Err(e) => {
                        warn!(error = %e, "failed to decode push message");
                        events.push(Event::DecodeFailed(e));
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to decode push message");
                events.push(Event::DecodeFailed(e));
            }
        }

        let handler = Arc::clone(&self.handler);
        self.tasks.spawn(async move {
            for event in events {
                handler.handle(event);
            }
        });
    }

    fn handle_disconnect(self: &Arc<Self>, id: u64) {
        {
            let mut slot = self.slot.lock();
            let current = slot.connection.as_ref().map(|c| c.id);
            if slot.state != SessionState::Connected || current != Some(id) {
                return;
            }
            if slot.transition(SessionState::Disconnected, None).is_err() {
                return;
            }
        }

        info!(connection_id = id, "stream disconnected");
        self.handler.handle(Event::Disconnected);

        if self.shutdown.is_cancelled() {
            return;
        }
        let mut slot = self.slot.lock();
        if slot.state == SessionState::Disconnected
            && slot.transition(SessionState::Reconnecting, None).is_ok()
        {
            self.tasks.spawn(Arc::clone(self).reconnect_loop());
        }
    }

    async fn reconnect_loop(self: Arc<Self>) {
        let delay = self.config.reconnect_delay;
        let mut attempt: u64 = 0;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("reconnect loop cancelled");
                    return;
                }
                _ = sleep(delay) => {}
            }

            attempt += 1;
            if self
                .slot
                .lock()
                .transition(SessionState::Connecting, None)
                .is_err()
            {
                return;
            }

            info!(attempt, "attempting to reconnect");
            match self.open().await {
                Ok(()) => {
                    info!(attempt, "reconnected");
                    return;
                }
                Err(Error::Closed) => return,
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect failed");
                    if self
                        .slot
                        .lock()
                        .transition(SessionState::Reconnecting, None)
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }
    }
}

/// `<base>/api/ws?listen_key=<stream_key>`
pub(crate) fn stream_url(base_url: &str, stream_key: &str) -> Result<Url, Error> {
    let mut url = Url::parse(&format!("{}/api/ws", base_url.trim_end_matches('/')))?;
    url.query_pairs_mut().append_pair("listen_key", stream_key);
    Ok(url)
}
