//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs / transport.rs (optional TLS handshake)
//!     → connection.rs (state machine: Http → FramedPush → Closing)
//!     → manager.rs (registry, stop, broadcast)
//!
//! Per connection:
//!     read → decode → RequestHandler → write_queue → write
//!     timer.rs bounds every wait on the peer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS is optional and handled transparently

pub mod connection;
pub mod error;
pub mod listener;
pub mod manager;
pub mod timer;
pub mod tls;
pub mod transport;
pub mod write_queue;

pub use connection::{Connection, ConnectionHandle, ConnectionId, ConnectionSettings, ProtocolMode};
pub use error::{CloseReason, ConnectionError, TransportError};
pub use listener::Listener;
pub use manager::ConnectionManager;
pub use transport::Security;
