//! Request handler boundary.

use bytes::Bytes;
use http::{Request, Response};

use crate::net::connection::ConnectionId;
use crate::websocket::codec::PushMessage;

/// Who sent a push-mode message.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: ConnectionId,
    /// Peer IP with any `::ffff:` prefix stripped.
    pub host: String,
    pub secure: bool,
}

/// Turns requests into responses and push messages into replies.
///
/// Called synchronously from the connection's task; implementations must not
/// block. A response with status 101 upgrades the connection.
pub trait RequestHandler: Send + Sync + 'static {
    /// Answer a parsed HTTP request.
    ///
    /// The request carries [`RemoteHost`](crate::http::RemoteHost) and
    /// [`KeepAlive`](crate::http::KeepAlive) extensions.
    fn handle(&self, request: &Request<Bytes>) -> Response<Bytes>;

    /// Handle one application message received after an upgrade.
    fn on_message(&self, _peer: &PeerInfo, _message: PushMessage) -> Option<PushMessage> {
        None
    }
}
