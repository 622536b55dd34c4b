//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the hub web server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the hub web server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HubConfig {
    /// Listening endpoints, each plain or TLS.
    pub listeners: Vec<ListenerConfig>,

    /// Per-connection timers and limits.
    pub connection: ConnectionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listeners: vec![ListenerConfig::default()],
            connection: ConnectionConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Connection timers and size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Liveness window. HTTP connections close after one idle window;
    /// WebSocket connections are probed first and closed after the second.
    pub idle_timeout_secs: u64,

    /// TLS handshake deadline.
    pub handshake_timeout_secs: u64,

    /// How long a closing connection may spend flushing queued writes.
    pub close_grace_ms: u64,

    /// Upper bound for a single read.
    pub read_chunk_bytes: usize,

    /// Largest request head plus body accepted.
    pub max_request_bytes: usize,

    /// Largest WebSocket message accepted, after reassembly.
    pub max_message_bytes: usize,

    /// Outbound bytes a connection may have queued behind the in-flight
    /// write before it is closed as a slow consumer.
    pub max_pending_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 20,
            handshake_timeout_secs: 10,
            close_grace_ms: 2000,
            read_chunk_bytes: 4096,
            max_request_bytes: 1024 * 1024,
            max_message_bytes: 1024 * 1024,
            max_pending_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
