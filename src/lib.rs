//! Home-automation hub web server library.
//!
//! Connection handling for the hub's HTTP/1.1 and WebSocket endpoints:
//! plain or TLS transports, a per-connection state machine with liveness
//! timers, and a manager that can stop or push to every live connection.

pub mod config;
pub mod http;
pub mod hub;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod websocket;

pub use crate::config::HubConfig;
pub use crate::http::{HubServer, RequestHandler};
pub use crate::hub::HubHandler;
pub use crate::lifecycle::Shutdown;
pub use crate::net::ConnectionManager;
