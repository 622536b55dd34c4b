//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Connection read buffer
//!     → request.rs (incremental HTTP/1.1 decode, keep-alive, peer host)
//!     → handler.rs (RequestHandler answers the request)
//!     → response.rs (serialize, fill in framing headers)
//!     → connection write queue
//!
//! server.rs binds listeners and feeds accepted sockets to the connections.
//! ```

pub mod handler;
pub mod request;
pub mod response;
pub mod server;

pub use handler::{PeerInfo, RequestHandler};
pub use request::{HttpDecode, HttpParseError, KeepAlive, RemoteHost};
pub use server::{BoundListener, HubServer, ServerError};
