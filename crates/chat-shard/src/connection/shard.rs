//! Gateway shard
//!
//! One shard owns one socket at a time. `connect` opens it, waits for Hello
//! and sends Identify or Resume; from then on a single reader task handles
//! frames in order and a monitor task sends heartbeats. Either task may
//! notice the connection is gone; whichever does first tears it down and
//! starts the reconnect loop.
//!
//! Every connection gets a new generation number. Tasks carry the
//! generation they were started for and stop as soon as it moves on.

use super::config::{Backoff, ShardConfig};
use super::heartbeat::{first_heartbeat_delay, HeartbeatCheck, HeartbeatState};
use super::session::{Handshake, SessionInfo};
use super::state::ConnectionState;
use crate::error::{ShardError, ShardResult};
use crate::events::{DispatchEvent, EventBus, EventType, ReadyEvent};
use crate::protocol::{
    close_codes, CloseCode, GatewayMessage, HelloPayload, IdentifyPayload, InboundFrame,
    PresenceUpdatePayload, ResumePayload, RESUMABLE_CLOSE,
};
use chat_ratelimit::RateLimitCoordinator;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketSink = SplitSink<Socket, Message>;
type SocketStream = SplitStream<Socket>;

/// What the reader does after one frame
enum Flow {
    Continue,
    /// Drop the connection and reconnect with whatever session is left
    Reconnect,
}

/// One gateway connection session
pub struct Shard {
    index: u32,
    config: Arc<ShardConfig>,
    limiter: Arc<RateLimitCoordinator>,
    bus: Arc<EventBus>,

    state: RwLock<ConnectionState>,
    session: Mutex<SessionInfo>,
    heartbeat: Mutex<HeartbeatState>,

    /// Write half of the socket; the reader owns the read half
    sink: tokio::sync::Mutex<Option<SocketSink>>,
    /// Stops the current connection's reader and monitor
    stop: Mutex<Option<watch::Sender<bool>>>,
    generation: AtomicU64,
    shutdown: AtomicBool,
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("index", &self.index)
            .field("shard_count", &self.config.shard_count)
            .field("state", &self.state())
            .finish()
    }
}

impl Shard {
    pub fn new(
        index: u32,
        config: Arc<ShardConfig>,
        limiter: Arc<RateLimitCoordinator>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let heartbeat = HeartbeatState::new(Duration::from_millis(45_000));
        Arc::new(Self {
            index,
            config,
            limiter,
            bus,
            state: RwLock::new(ConnectionState::Dead),
            session: Mutex::new(SessionInfo::new()),
            heartbeat: Mutex::new(heartbeat),
            sink: tokio::sync::Mutex::new(None),
            stop: Mutex::new(None),
            generation: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn index(&self) -> u32 {
        self.index
    }

    /// `[index, shard_count]`
    pub fn info(&self) -> [u32; 2] {
        [self.index, self.config.shard_count]
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn session_id(&self) -> Option<String> {
        self.session.lock().session_id().map(str::to_string)
    }

    pub fn sequence(&self) -> Option<u64> {
        self.session.lock().sequence()
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        self.heartbeat.lock().latency()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat.lock().interval()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Open a connection and perform the handshake.
    ///
    /// Any existing connection is dropped first. On failure the shard is
    /// left `Dead`; the caller decides whether to retry.
    pub async fn connect(self: &Arc<Self>) -> ShardResult<()> {
        if self.state() != ConnectionState::Dead {
            self.kill().await;
        }
        self.set_state(ConnectionState::Connecting);

        let url = self.session.lock().connect_url(&self.config.url);
        tracing::debug!(shard = self.index, url = %url, "Connecting to gateway");

        let socket = match connect_async(url.as_str()).await {
            Ok((socket, _response)) => socket,
            Err(e) => {
                self.set_state(ConnectionState::Dead);
                return Err(ShardError::Connect(e));
            }
        };
        let (mut sink, mut stream) = socket.split();

        let interval = match self.open_session(&mut sink, &mut stream).await {
            Ok(interval) => interval,
            Err(e) => {
                let _ = sink.close().await;
                self.set_state(ConnectionState::Dead);
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop.lock() = Some(stop_tx);
        self.heartbeat.lock().reset(interval);
        *self.sink.lock().await = Some(sink);
        self.set_state(ConnectionState::Connected);

        tokio::spawn(Arc::clone(self).run_reader(generation, stream, stop_rx.clone()));
        tokio::spawn(Arc::clone(self).run_heartbeat(generation, stop_rx));

        tracing::info!(
            shard = self.index,
            heartbeat_interval_ms = interval.as_millis() as u64,
            "Shard connected"
        );
        Ok(())
    }

    /// Wait for Hello, then send Identify or Resume. Returns the heartbeat
    /// interval.
    async fn open_session(
        &self,
        sink: &mut SocketSink,
        stream: &mut SocketStream,
    ) -> ShardResult<Duration> {
        let hello = self.read_hello(stream).await?;
        if hello.heartbeat_interval == 0 {
            return Err(ShardError::Handshake("Hello with zero heartbeat interval".to_string()));
        }

        let handshake = self.session.lock().handshake();
        let message = match handshake {
            Handshake::Resume {
                session_id,
                sequence,
            } => {
                tracing::info!(
                    shard = self.index,
                    session_id = %session_id,
                    sequence,
                    "Resuming session"
                );
                GatewayMessage::resume(&ResumePayload {
                    token: self.config.token.clone(),
                    session_id,
                    seq: sequence,
                })?
            }
            Handshake::Identify => {
                self.limiter.identify_wait(self.index).await?;
                tracing::info!(shard = self.index, "Identifying new session");
                GatewayMessage::identify(&self.identify_payload())?
            }
        };

        sink.send(Message::Text(message.to_json()?)).await?;
        Ok(Duration::from_millis(hello.heartbeat_interval))
    }

    async fn read_hello(&self, stream: &mut SocketStream) -> ShardResult<HelloPayload> {
        let first_text = async {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(text),
                    Some(Ok(Message::Close(frame))) => {
                        return Err(ShardError::Handshake(format!(
                            "closed before Hello: {:?}",
                            frame.map(|f| u16::from(f.code))
                        )));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ShardError::Socket(e)),
                    None => {
                        return Err(ShardError::Handshake(
                            "connection ended before Hello".to_string(),
                        ));
                    }
                }
            }
        };

        let text = tokio::time::timeout(self.config.hello_timeout, first_text)
            .await
            .map_err(|_| ShardError::Handshake("timed out waiting for Hello".to_string()))??;

        match GatewayMessage::from_json(&text)?.into_frame()? {
            InboundFrame::Hello(hello) => Ok(hello),
            other => Err(ShardError::Handshake(format!(
                "expected Hello as first frame, got {other:?}"
            ))),
        }
    }

    fn identify_payload(&self) -> IdentifyPayload {
        IdentifyPayload {
            token: self.config.token.clone(),
            properties: self.config.properties.clone(),
            compress: self.config.compress,
            large_threshold: self.config.large_threshold,
            shard: self.info(),
            presence: self.config.presence.clone(),
            intents: self.config.intents,
        }
    }

    /// Drop the connection, keeping the session for a later Resume.
    ///
    /// Idempotent. Does not reconnect on its own.
    pub async fn kill(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.teardown(RESUMABLE_CLOSE).await;
    }

    /// Close with 1000, forget the session and stop reconnecting.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.session.lock().clear();
        self.teardown(CloseCode::Normal.as_u16()).await;
        tracing::info!(shard = self.index, "Shard shut down");
    }

    async fn teardown(&self, close_code: u16) {
        let stop = self.stop.lock().take();
        if let Some(stop) = stop {
            let _ = stop.send(true);
        }

        if self.state() != ConnectionState::Dead {
            self.set_state(ConnectionState::Disconnecting);
        }

        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            let frame = CloseFrame {
                code: WsCloseCode::from(close_code),
                reason: Cow::Borrowed(""),
            };
            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                tracing::debug!(shard = self.index, error = %e, "Close frame not delivered");
            }
            let _ = sink.close().await;
        }

        self.set_state(ConnectionState::Dead);
    }

    /// Handle a lost connection exactly once per generation.
    async fn connection_lost(self: &Arc<Self>, generation: u64, close_code: Option<u16>) {
        // The reader and the monitor can both notice the same loss
        if self
            .generation
            .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let cleared = close_code.is_some_and(|code| self.session.lock().apply_close(code));
        if cleared {
            tracing::info!(
                shard = self.index,
                close_code = ?close_code,
                "Session cleared, next handshake will Identify"
            );
        }

        self.teardown(RESUMABLE_CLOSE).await;

        if let Some(code) = close_code.filter(|code| close_codes::is_fatal(*code)) {
            tracing::error!(
                shard = self.index,
                close_code = code,
                reason = ?CloseCode::from_u16(code),
                "Fatal close code, not reconnecting"
            );
            return;
        }

        self.schedule_reconnect();
    }

    /// Reconnect in the background until a connection succeeds or the shard
    /// is shut down. Best effort: failures are only logged.
    pub fn schedule_reconnect(self: &Arc<Self>) {
        if self.shutdown.load(Ordering::SeqCst) || !self.config.auto_reconnect {
            return;
        }

        let shard = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff = Backoff::new(shard.config.backoff_base, shard.config.backoff_max);
            while !shard.shutdown.load(Ordering::SeqCst) {
                match shard.connect().await {
                    Ok(()) => return,
                    Err(e) => {
                        let delay = backoff.next_delay();
                        tracing::warn!(
                            shard = shard.index,
                            error = %e,
                            retry_in_ms = delay.as_millis() as u64,
                            "Reconnect failed"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        });
    }

    // =========================================================================
    // Sending
    // =========================================================================

    pub async fn send(&self, message: &GatewayMessage) -> ShardResult<()> {
        let text = message.to_json()?;
        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(ShardError::NotConnected)?;
        sink.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Send a presence update (op 3)
    pub async fn update_presence(&self, presence: &PresenceUpdatePayload) -> ShardResult<()> {
        if !self.is_connected() {
            return Err(ShardError::NotConnected);
        }
        self.send(&GatewayMessage::presence_update(presence)?).await
    }

    // =========================================================================
    // Reader
    // =========================================================================

    async fn run_reader(
        self: Arc<Self>,
        generation: u64,
        mut stream: SocketStream,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            let next = tokio::select! {
                _ = stop.changed() => return,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => match self.handle_text(&text).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Reconnect) => {
                        self.connection_lost(generation, None).await;
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(shard = self.index, error = %e, "Dropping malformed frame");
                    }
                },
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(shard = self.index, bytes = data.len(), "Ignoring binary frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    let close_code = frame.as_ref().map(|f| u16::from(f.code));
                    tracing::info!(
                        shard = self.index,
                        close_code = ?close_code,
                        reason = %frame.as_ref().map_or("", |f| &*f.reason),
                        "Gateway closed the connection"
                    );
                    self.connection_lost(generation, close_code).await;
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(shard = self.index, error = %e, "Gateway read failed");
                    self.connection_lost(generation, None).await;
                    return;
                }
                None => {
                    tracing::warn!(shard = self.index, "Gateway stream ended");
                    self.connection_lost(generation, None).await;
                    return;
                }
            }

            if self.generation() != generation || !self.is_connected() {
                return;
            }
        }
    }

    async fn handle_text(self: &Arc<Self>, text: &str) -> ShardResult<Flow> {
        let message = GatewayMessage::from_json(text)?;
        let sequence = message.s;
        if let Some(sequence) = sequence {
            self.session.lock().record_sequence(sequence);
        }

        match message.into_frame()? {
            InboundFrame::Dispatch { event, data } => {
                self.handle_dispatch(&event, sequence, data).await;
                Ok(Flow::Continue)
            }
            InboundFrame::Heartbeat => {
                tracing::trace!(shard = self.index, "Heartbeat requested by gateway");
                Ok(Flow::Continue)
            }
            InboundFrame::Reconnect => {
                tracing::info!(shard = self.index, "Gateway requested reconnect");
                Ok(Flow::Reconnect)
            }
            InboundFrame::InvalidSession { resumable } => {
                if !resumable {
                    self.session.lock().clear();
                }
                tracing::warn!(shard = self.index, resumable, "Session invalidated");
                Ok(Flow::Reconnect)
            }
            InboundFrame::Hello(hello) => {
                if hello.heartbeat_interval > 0 {
                    self.heartbeat
                        .lock()
                        .set_interval(Duration::from_millis(hello.heartbeat_interval));
                }
                Ok(Flow::Continue)
            }
            InboundFrame::HeartbeatAck => {
                let latency = {
                    let mut heartbeat = self.heartbeat.lock();
                    heartbeat.record_ack(Instant::now());
                    heartbeat.latency()
                };
                tracing::trace!(shard = self.index, latency = ?latency, "Heartbeat acknowledged");
                Ok(Flow::Continue)
            }
        }
    }

    async fn handle_dispatch(self: &Arc<Self>, name: &str, sequence: Option<u64>, data: Value) {
        let Some(kind) = EventType::parse(name) else {
            tracing::trace!(shard = self.index, event = name, "Ignoring unknown event");
            return;
        };

        match kind {
            EventType::Ready => match ReadyEvent::deserialize(&data) {
                Ok(ready) => {
                    tracing::info!(
                        shard = self.index,
                        session_id = %ready.session_id,
                        "Shard ready"
                    );
                    self.session
                        .lock()
                        .start(ready.session_id, sequence, ready.resume_gateway_url);
                }
                Err(e) => {
                    tracing::warn!(shard = self.index, error = %e, "READY without a usable session");
                }
            },
            EventType::Resumed => {
                tracing::info!(shard = self.index, sequence = ?sequence, "Session resumed");
            }
            _ => {}
        }

        let handlers = self
            .bus
            .dispatch(
                self,
                DispatchEvent {
                    kind,
                    sequence,
                    data,
                },
            )
            .await;
        tracing::trace!(shard = self.index, event = %kind, handlers, "Event dispatched");
    }

    // =========================================================================
    // Heartbeat monitor
    // =========================================================================

    async fn run_heartbeat(self: Arc<Self>, generation: u64, mut stop: watch::Receiver<bool>) {
        let mut delay = first_heartbeat_delay(self.heartbeat_interval());

        loop {
            tokio::select! {
                _ = stop.changed() => return,
                () = tokio::time::sleep(delay) => {}
            }
            if self.generation() != generation {
                return;
            }

            let now = Instant::now();
            let (check, interval) = {
                let heartbeat = self.heartbeat.lock();
                (heartbeat.check(now), heartbeat.interval())
            };

            if check == HeartbeatCheck::Zombie {
                tracing::warn!(
                    shard = self.index,
                    interval_ms = interval.as_millis() as u64,
                    "Heartbeat not acknowledged, reconnecting"
                );
                self.connection_lost(generation, None).await;
                return;
            }

            let sequence = self.sequence();
            if let Err(e) = self.send(&GatewayMessage::heartbeat(sequence)).await {
                tracing::warn!(shard = self.index, error = %e, "Heartbeat send failed, reconnecting");
                self.connection_lost(generation, None).await;
                return;
            }
            // The tick instant, not the send completion: an ack can land first
            self.heartbeat.lock().record_sent(now);
            tracing::trace!(shard = self.index, sequence = ?sequence, "Heartbeat sent");

            delay = interval;
        }
    }
}
