//! Connection state machine.
//!
//! # Responsibilities
//! - Run the TLS handshake, then the read → decode → dispatch → write cycle
//! - Switch from HTTP to WebSocket when a handler answers 101
//! - Enforce the liveness timer and probe idle WebSocket clients
//! - Drain queued writes on close and tear the transport down exactly once
//!
//! # States
//! ```text
//! Http ──101──▶ FramedPush
//!   │               │
//!   └──────┬────────┘
//!          ▼
//!       Closing (terminal: drain writes or grace period, then teardown)
//! ```
//!
//! # Design Decisions
//! - One task per connection owns every buffer; other tasks talk to it
//!   through [`ConnectionHandle`] commands
//! - The write future owns the write half and hands it back on completion,
//!   so at most one write can be in flight
//! - Protocol logic never touches the socket: it only enqueues bytes

use std::fmt;
use std::future::{self, Future};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use http::Request;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::config::ConnectionConfig;
use crate::http::handler::{PeerInfo, RequestHandler};
use crate::http::request::{self as http_request, HttpDecode, KeepAlive, RemoteHost};
use crate::http::response;
use crate::net::error::{CloseReason, ConnectionError, ProtocolParseError, TransportError};
use crate::net::listener::ConnectionPermit;
use crate::net::timer::LivenessTimer;
use crate::net::transport::{ReadOutcome, Security, Transport, TransportReader, TransportWriter};
use crate::net::write_queue::{WriteQueue, WriteStep};
use crate::observability::metrics;
use crate::websocket::codec::{self, FrameDecode, FrameDecoder, PushEvent, PushMessage};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Protocol spoken on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    /// HTTP/1.1 request/response (initial).
    Http,
    /// WebSocket after a 101 upgrade.
    FramedPush,
    /// Draining queued writes before teardown (terminal).
    Closing,
}

impl ProtocolMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolMode::Http => "http",
            ProtocolMode::FramedPush => "push",
            ProtocolMode::Closing => "closing",
        }
    }
}

/// Per-connection limits and timers.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub idle_timeout: Duration,
    pub handshake_timeout: Duration,
    pub close_grace: Duration,
    pub read_chunk: usize,
    pub max_request_bytes: usize,
    pub max_message_bytes: usize,
    pub max_pending_bytes: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

impl From<&ConnectionConfig> for ConnectionSettings {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
            close_grace: Duration::from_millis(config.close_grace_ms),
            read_chunk: config.read_chunk_bytes,
            max_request_bytes: config.max_request_bytes,
            max_message_bytes: config.max_message_bytes,
            max_pending_bytes: config.max_pending_bytes,
        }
    }
}

#[derive(Debug)]
enum Command {
    Push(PushMessage),
    Stop,
}

/// Cloneable reference to a running connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    upgraded: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// True once the connection speaks WebSocket.
    pub fn is_upgraded(&self) -> bool {
        self.upgraded.load(Ordering::Acquire)
    }

    /// Queue a message for the client. Dropped unless the connection is upgraded.
    ///
    /// Returns false when the connection has already ended.
    pub fn push(&self, message: PushMessage) -> bool {
        self.commands.send(Command::Push(message)).is_ok()
    }

    /// Ask the connection to close. Idempotent.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }
}

type WriteFuture<S> =
    Pin<Box<dyn Future<Output = (TransportWriter<S>, Result<(), TransportError>)> + Send>>;

/// The write half, either idle or lent to the in-flight write.
struct Writer<S> {
    idle: Option<TransportWriter<S>>,
    busy: Option<WriteFuture<S>>,
}

impl<S> Writer<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn new(writer: TransportWriter<S>) -> Self {
        Self {
            idle: Some(writer),
            busy: None,
        }
    }

    fn is_busy(&self) -> bool {
        self.busy.is_some()
    }

    fn start(&mut self, bytes: Bytes) -> Result<(), ConnectionError> {
        let mut writer = self.idle.take().ok_or(ConnectionError::QueueInvariantViolation(
            "write started while another is in flight",
        ))?;
        self.busy = Some(Box::pin(async move {
            let result = writer.write_all(&bytes).await;
            (writer, result)
        }));
        Ok(())
    }

    /// Resolves when the in-flight write finishes. Cancel-safe.
    async fn completion(&mut self) -> Result<(), TransportError> {
        let busy = match self.busy.as_mut() {
            Some(busy) => busy,
            None => return future::pending().await,
        };
        let (writer, result) = busy.await;
        self.busy = None;
        self.idle = Some(writer);
        result
    }

    /// Half-close if idle; an unfinished write is abandoned.
    async fn close(mut self, grace: Duration) {
        self.busy = None;
        if let Some(mut writer) = self.idle.take() {
            let _ = tokio::time::timeout(grace, writer.shutdown()).await;
        }
    }
}

/// A client connection that has not started yet.
pub struct Connection<S = TcpStream> {
    stream: S,
    security: Security,
    permit: Option<ConnectionPermit>,
    commands_tx: mpsc::UnboundedSender<Command>,
    state: ConnectionState,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        security: Security,
        settings: ConnectionSettings,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let state = ConnectionState {
            id: ConnectionId::new(),
            peer,
            host: http_request::normalize_host(peer.ip()),
            secure: security.is_secure(),
            mode: ProtocolMode::Http,
            keep_alive: false,
            read_buf: BytesMut::with_capacity(settings.read_chunk),
            reading: false,
            queue: WriteQueue::new(),
            ready: None,
            timer: LivenessTimer::new(),
            grace: LivenessTimer::new(),
            missed_probes: 0,
            frames: FrameDecoder::new(settings.max_message_bytes),
            close_code: CloseCode::Normal,
            close_reason: None,
            done: false,
            last_activity: Instant::now(),
            upgraded: Arc::new(AtomicBool::new(false)),
            commands,
            commands_open: true,
            handler,
            settings,
        };
        Self {
            stream,
            security,
            permit: None,
            commands_tx,
            state,
        }
    }

    /// Hold a listener slot for the lifetime of the connection.
    pub fn with_permit(mut self, permit: ConnectionPermit) -> Self {
        self.permit = Some(permit);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.state.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.state.peer
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            id: self.state.id,
            peer: self.state.peer,
            upgraded: Arc::clone(&self.state.upgraded),
            commands: self.commands_tx.clone(),
        }
    }

    /// Drive the connection until it closes.
    pub async fn run(self) -> CloseReason {
        let Connection {
            stream,
            security,
            permit,
            commands_tx,
            mut state,
        } = self;
        // Only external handles keep the command channel open.
        drop(commands_tx);

        metrics::record_connection_opened(state.secure);
        tracing::debug!(
            connection_id = %state.id,
            peer = %state.peer,
            secure = state.secure,
            "Connection started"
        );

        let reason = state.run(stream, &security).await;

        metrics::record_connection_closed(reason.label());
        if reason.is_error() {
            tracing::info!(
                connection_id = %state.id,
                peer = %state.peer,
                mode = state.mode.as_str(),
                reason = %reason,
                "Connection closed with error"
            );
        } else {
            tracing::debug!(
                connection_id = %state.id,
                peer = %state.peer,
                reason = %reason,
                idle_ms = state.last_activity.elapsed().as_millis() as u64,
                "Connection closed"
            );
        }
        drop(permit);
        reason
    }
}

struct ConnectionState {
    id: ConnectionId,
    peer: SocketAddr,
    host: String,
    secure: bool,
    mode: ProtocolMode,
    keep_alive: bool,
    read_buf: BytesMut,
    reading: bool,
    queue: WriteQueue,
    /// Buffer the queue released for writing, not yet handed to the writer.
    ready: Option<Bytes>,
    timer: LivenessTimer,
    grace: LivenessTimer,
    missed_probes: u32,
    frames: FrameDecoder,
    close_code: CloseCode,
    close_reason: Option<CloseReason>,
    /// Tear down now, without waiting for queued writes.
    done: bool,
    last_activity: Instant,
    upgraded: Arc<AtomicBool>,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    handler: Arc<dyn RequestHandler>,
    settings: ConnectionSettings,
}

impl ConnectionState {
    async fn run<S>(&mut self, stream: S, security: &Security) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let handshake = Transport::handshake(stream, security, self.settings.handshake_timeout);
        tokio::pin!(handshake);
        let transport = loop {
            tokio::select! {
                result = &mut handshake => match result {
                    Ok(transport) => break transport,
                    Err(e) => {
                        tracing::warn!(connection_id = %self.id, peer = %self.peer, error = %e, "Handshake failed");
                        return e.into();
                    }
                },
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(Command::Stop) => return CloseReason::Stopped,
                    Some(Command::Push(_)) => {
                        tracing::trace!(connection_id = %self.id, "Dropping push during handshake");
                    }
                    None => self.commands_open = false,
                },
            }
        };

        let (reader, writer) = transport.into_split();
        self.serve(reader, Writer::new(writer)).await
    }

    async fn serve<S>(&mut self, mut reader: TransportReader<S>, mut writer: Writer<S>) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.start_read();

        loop {
            if let Some(bytes) = self.ready.take() {
                if let Err(e) = writer.start(bytes) {
                    tracing::error!(connection_id = %self.id, error = %e, "Write queue out of sync");
                    self.fail(CloseReason::Error(e));
                }
            }
            if self.done || (self.mode == ProtocolMode::Closing && self.queue.is_drained()) {
                break;
            }

            tokio::select! {
                read = reader.read_some(&mut self.read_buf, self.settings.read_chunk), if self.reading => {
                    self.on_read(read);
                }
                result = writer.completion(), if writer.is_busy() => {
                    self.on_write_complete(result);
                }
                _ = self.timer.expired() => self.on_timeout(),
                _ = self.grace.expired() => {
                    tracing::debug!(connection_id = %self.id, pending = self.queue.pending(), "Close grace period elapsed");
                    self.done = true;
                }
                command = self.commands.recv(), if self.commands_open => self.on_command(command),
            }
        }

        self.timer.cancel();
        self.grace.cancel();
        writer.close(self.settings.close_grace).await;
        drop(reader);
        self.close_reason.take().unwrap_or(CloseReason::Completed)
    }

    fn start_read(&mut self) {
        self.reading = true;
        self.timer.arm(self.settings.idle_timeout);
    }

    fn enqueue(&mut self, bytes: Bytes) {
        if let Some(bytes) = self.queue.enqueue(bytes) {
            self.ready = Some(bytes);
            return;
        }
        let pending = self.queue.pending_bytes();
        if pending > self.settings.max_pending_bytes && self.mode != ProtocolMode::Closing {
            tracing::warn!(connection_id = %self.id, pending, "Client is not reading, closing");
            self.close_code = CloseCode::Policy;
            self.begin_closing(CloseReason::Error(ConnectionError::SlowConsumer(pending)));
        }
    }

    /// Enter Closing; queued writes still drain, bounded by the grace period.
    fn begin_closing(&mut self, reason: CloseReason) {
        if self.mode == ProtocolMode::Closing {
            return;
        }
        let previous = self.mode;
        self.mode = ProtocolMode::Closing;
        self.reading = false;
        self.timer.cancel();
        self.close_reason.get_or_insert(reason);
        if previous == ProtocolMode::FramedPush {
            self.enqueue(codec::build_close_frame(self.close_code, ""));
        }
        self.grace.arm(self.settings.close_grace);
    }

    /// Tear down without draining.
    fn fail(&mut self, reason: CloseReason) {
        self.mode = ProtocolMode::Closing;
        self.reading = false;
        self.timer.cancel();
        self.close_reason.get_or_insert(reason);
        self.done = true;
    }

    fn on_read(&mut self, read: Result<ReadOutcome, TransportError>) {
        self.reading = false;
        self.timer.cancel();
        match read {
            Ok(ReadOutcome::Data(n)) => {
                tracing::trace!(connection_id = %self.id, bytes = n, "Read");
                self.last_activity = Instant::now();
                self.missed_probes = 0;
                self.process_input();
            }
            Ok(ReadOutcome::Closed) => self.begin_closing(CloseReason::PeerClosed),
            Err(e) => self.fail(e.into()),
        }
    }

    /// Decode every complete unit in the read buffer.
    fn process_input(&mut self) {
        loop {
            match self.mode {
                ProtocolMode::Http => {
                    match http_request::decode(&self.read_buf, self.settings.max_request_bytes) {
                        HttpDecode::Complete { request, consumed } => {
                            self.read_buf.advance(consumed);
                            self.dispatch_request(request);
                            if !self.keep_alive {
                                // The response is the last thing on this connection.
                                self.hold_timer_for_write();
                                return;
                            }
                        }
                        HttpDecode::Incomplete => break,
                        HttpDecode::Malformed(e) => {
                            tracing::debug!(connection_id = %self.id, error = %e, "Malformed request");
                            self.keep_alive = false;
                            self.read_buf.clear();
                            let reply = response::bad_request();
                            metrics::record_http_request(reply.status().as_u16());
                            self.enqueue(response::serialize(&reply, &http::Method::GET, false));
                            self.hold_timer_for_write();
                            return;
                        }
                    }
                }
                ProtocolMode::FramedPush => match self.frames.parse(&self.read_buf, self.keep_alive) {
                    FrameDecode::Messages {
                        events,
                        consumed,
                        keep_alive,
                    } => {
                        self.read_buf.advance(consumed);
                        self.keep_alive = keep_alive;
                        for event in events {
                            self.dispatch_event(event);
                            if self.mode == ProtocolMode::Closing {
                                return;
                            }
                        }
                        if !self.keep_alive {
                            self.begin_closing(CloseReason::PeerClosed);
                            return;
                        }
                    }
                    FrameDecode::Incomplete => break,
                    FrameDecode::Error(e) => {
                        tracing::debug!(connection_id = %self.id, error = %e, "WebSocket protocol error");
                        self.close_code = e.close_code();
                        self.begin_closing(ProtocolParseError::from(e).into());
                        return;
                    }
                },
                ProtocolMode::Closing => return,
            }
        }
        self.start_read();
    }

    /// Keep a stalled final write bounded by the idle timeout.
    fn hold_timer_for_write(&mut self) {
        if self.queue.in_flight() {
            self.timer.arm(self.settings.idle_timeout);
        }
    }

    fn dispatch_request(&mut self, mut request: Request<Bytes>) {
        self.keep_alive = http_request::wants_keep_alive(&request);
        request.extensions_mut().insert(RemoteHost(self.host.clone()));
        request.extensions_mut().insert(KeepAlive(self.keep_alive));

        let reply = self.handler.handle(&request);
        let upgrade = response::is_upgrade(&reply);
        if upgrade {
            self.keep_alive = true;
        }

        tracing::debug!(
            connection_id = %self.id,
            method = %request.method(),
            path = %request.uri().path(),
            status = reply.status().as_u16(),
            keep_alive = self.keep_alive,
            "Request handled"
        );
        metrics::record_http_request(reply.status().as_u16());
        self.enqueue(response::serialize(&reply, request.method(), self.keep_alive));

        if upgrade {
            self.mode = ProtocolMode::FramedPush;
            self.upgraded.store(true, Ordering::Release);
            tracing::info!(connection_id = %self.id, peer = %self.host, "Connection upgraded to WebSocket");
        }
    }

    fn dispatch_event(&mut self, event: PushEvent) {
        match event {
            PushEvent::Message(message) => {
                metrics::record_push_message("inbound");
                let peer = PeerInfo {
                    id: self.id,
                    host: self.host.clone(),
                    secure: self.secure,
                };
                if let Some(reply) = self.handler.on_message(&peer, message) {
                    self.send_message(&reply);
                }
            }
            PushEvent::Ping(payload) => self.enqueue(codec::build_pong(&payload)),
            PushEvent::Pong(_) => {
                tracing::trace!(connection_id = %self.id, "Pong received");
            }
            PushEvent::Close(detail) => {
                tracing::debug!(connection_id = %self.id, close = ?detail, "Close frame received");
                // Echo the peer's status code; a bare close is answered with 1000.
                if let Some((code, _)) = detail {
                    self.close_code = CloseCode::from(code);
                }
            }
        }
    }

    fn send_message(&mut self, message: &PushMessage) {
        metrics::record_push_message("outbound");
        self.enqueue(codec::encode_message(message));
    }

    fn on_write_complete(&mut self, result: Result<(), TransportError>) {
        let step = self.queue.on_write_complete(result.is_ok(), self.keep_alive);
        match (step, result) {
            (Ok(WriteStep::Next(bytes)), _) => {
                self.ready = Some(bytes);
                if !self.reading && self.mode != ProtocolMode::Closing {
                    self.timer.arm(self.settings.idle_timeout);
                }
            }
            (Ok(WriteStep::Idle), _) => {
                if !self.reading {
                    self.timer.cancel();
                }
            }
            (Ok(WriteStep::HalfClose), _) => {
                self.mode = ProtocolMode::Closing;
                self.close_reason.get_or_insert(CloseReason::Completed);
                self.done = true;
            }
            (Ok(WriteStep::Failed), Err(e)) => self.fail(e.into()),
            (Ok(WriteStep::Failed), Ok(())) => {
                self.fail(CloseReason::Error(ConnectionError::QueueInvariantViolation(
                    "successful write reported as failed",
                )));
            }
            (Err(e), _) => {
                tracing::error!(connection_id = %self.id, error = %e, "Write queue out of sync");
                self.fail(CloseReason::Error(e));
            }
        }
    }

    fn on_timeout(&mut self) {
        let idle = self.settings.idle_timeout;
        match self.mode {
            ProtocolMode::Http => {
                tracing::debug!(connection_id = %self.id, "Idle timeout");
                metrics::record_timeout(self.mode.as_str());
                self.begin_closing(CloseReason::Error(ConnectionError::Timeout(idle)));
            }
            ProtocolMode::FramedPush if self.missed_probes == 0 => {
                tracing::debug!(connection_id = %self.id, "Idle WebSocket, sending liveness probe");
                metrics::record_liveness_probe();
                self.missed_probes = 1;
                self.enqueue(codec::build_liveness_probe());
                self.timer.arm(idle);
            }
            ProtocolMode::FramedPush => {
                tracing::debug!(connection_id = %self.id, "Liveness probe unanswered");
                metrics::record_timeout(self.mode.as_str());
                self.close_code = CloseCode::Away;
                self.begin_closing(CloseReason::Error(ConnectionError::Timeout(idle)));
            }
            ProtocolMode::Closing => {}
        }
    }

    fn on_command(&mut self, command: Option<Command>) {
        match command {
            Some(Command::Push(message)) => {
                if self.mode == ProtocolMode::FramedPush {
                    self.send_message(&message);
                } else {
                    tracing::trace!(connection_id = %self.id, mode = self.mode.as_str(), "Dropping push");
                }
            }
            Some(Command::Stop) => {
                self.close_code = CloseCode::Away;
                self.begin_closing(CloseReason::Stopped);
            }
            None => self.commands_open = false,
        }
    }
}
