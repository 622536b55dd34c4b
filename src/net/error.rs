//! Connection error kinds and close reasons.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::http::request::HttpParseError;
use crate::websocket::codec::FrameError;

/// Failures of the byte transport underneath a connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    /// TLS handshake did not finish in time.
    #[error("TLS handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Reading from the socket failed.
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    /// Writing to the socket failed.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
}

/// Malformed input in either protocol mode.
#[derive(Debug, Error)]
pub enum ProtocolParseError {
    #[error("malformed HTTP request: {0}")]
    Http(#[from] HttpParseError),

    #[error("invalid WebSocket frame: {0}")]
    Frame(#[from] FrameError),
}

/// Everything that can end a single connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolParseError),

    /// No inbound activity within the liveness window.
    #[error("idle timeout after {0:?}")]
    Timeout(Duration),

    /// Outbound bytes piled up past the configured limit because the client
    /// is not reading.
    #[error("client not reading, {0} bytes queued")]
    SlowConsumer(usize),

    /// A write was started while another was still in flight, or a
    /// completion arrived with nothing in flight. Never reported to a client.
    #[error("write queue invariant violated: {0}")]
    QueueInvariantViolation(&'static str),
}

/// Why a connection ended. Returned once from the connection task.
#[derive(Debug)]
pub enum CloseReason {
    /// Response flushed on a non keep-alive connection.
    Completed,
    /// Peer sent EOF or a WebSocket close frame.
    PeerClosed,
    /// Stopped through the connection manager.
    Stopped,
    /// The connection failed.
    Error(ConnectionError),
}

impl CloseReason {
    /// Short label used for metrics and structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            CloseReason::Completed => "completed",
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::Stopped => "stopped",
            CloseReason::Error(ConnectionError::Transport(_)) => "transport_error",
            CloseReason::Error(ConnectionError::Protocol(_)) => "protocol_error",
            CloseReason::Error(ConnectionError::Timeout(_)) => "timeout",
            CloseReason::Error(ConnectionError::SlowConsumer(_)) => "slow_consumer",
            CloseReason::Error(ConnectionError::QueueInvariantViolation(_)) => "invariant",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CloseReason::Error(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Error(e) => write!(f, "{}", e),
            other => f.write_str(other.label()),
        }
    }
}

impl From<TransportError> for CloseReason {
    fn from(e: TransportError) -> Self {
        CloseReason::Error(ConnectionError::Transport(e))
    }
}

impl From<ProtocolParseError> for CloseReason {
    fn from(e: ProtocolParseError) -> Self {
        CloseReason::Error(ConnectionError::Protocol(e))
    }
}
