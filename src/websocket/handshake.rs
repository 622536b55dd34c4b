//! Upgrade negotiation.

use bytes::Bytes;
use http::header::{
    CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL,
    SEC_WEBSOCKET_VERSION, UPGRADE,
};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use thiserror::Error;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("upgrade requests must use GET")]
    NotGet,

    #[error("missing `Upgrade: websocket`")]
    MissingUpgrade,

    #[error("missing `Connection: upgrade`")]
    MissingConnectionUpgrade,

    #[error("missing Sec-WebSocket-Key")]
    MissingKey,

    #[error("unsupported WebSocket version {0:?}")]
    UnsupportedVersion(String),
}

fn has_token(headers: &HeaderMap, name: http::header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// True when the request asks to switch to WebSocket.
pub fn is_upgrade_request<B>(request: &Request<B>) -> bool {
    has_token(request.headers(), UPGRADE, "websocket")
}

/// Validate an upgrade request and build the 101 response for it.
///
/// The first client-offered subprotocol found in `protocols` is echoed back.
pub fn accept_upgrade<B>(
    request: &Request<B>,
    protocols: &[&str],
) -> Result<Response<Bytes>, HandshakeError> {
    if request.method() != Method::GET {
        return Err(HandshakeError::NotGet);
    }
    let headers = request.headers();
    if !has_token(headers, UPGRADE, "websocket") {
        return Err(HandshakeError::MissingUpgrade);
    }
    if !has_token(headers, CONNECTION, "upgrade") {
        return Err(HandshakeError::MissingConnectionUpgrade);
    }
    let version = headers
        .get(SEC_WEBSOCKET_VERSION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if version.trim() != "13" {
        return Err(HandshakeError::UnsupportedVersion(version.to_string()));
    }
    let key = headers.get(SEC_WEBSOCKET_KEY).ok_or(HandshakeError::MissingKey)?;

    let mut builder = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(UPGRADE, "websocket")
        .header(CONNECTION, "Upgrade")
        .header(SEC_WEBSOCKET_ACCEPT, derive_accept_key(key.as_bytes()));

    let offered = headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .find(|p| protocols.contains(p));
    if let Some(protocol) = offered {
        if let Ok(value) = HeaderValue::from_str(protocol) {
            builder = builder.header(SEC_WEBSOCKET_PROTOCOL, value);
        }
    }

    // Every header above is a valid static or derived value.
    Ok(builder.body(Bytes::new()).unwrap_or_else(|_| Response::new(Bytes::new())))
}
