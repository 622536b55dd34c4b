//! WebSocket support for upgraded connections.
//!
//! # Data Flow
//! ```text
//! GET with `Upgrade: websocket`
//!     → handshake.rs (validate, derive Sec-WebSocket-Accept, build 101)
//!     → connection switches to push mode
//!     → codec.rs (decode client frames, encode server frames)
//! ```

pub mod codec;
pub mod handshake;

pub use codec::{FrameDecode, FrameDecoder, FrameError, PushEvent, PushMessage};
pub use handshake::{accept_upgrade, is_upgrade_request, HandshakeError};
