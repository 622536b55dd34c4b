//! Hub request handler.
//!
//! # Responsibilities
//! - `GET /json`: status document with uptime and open connections
//! - `GET /ws`: upgrade to the hub event stream
//! - Answer `request` events from WebSocket clients
//!
//! # Design Decisions
//! - Stateless apart from the start time; connection counts come from the manager
//! - Unknown or malformed push messages are ignored, not answered

use std::time::Instant;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::http::handler::{PeerInfo, RequestHandler};
use crate::http::response::stock_reply;
use crate::net::manager::ConnectionManager;
use crate::websocket::codec::PushMessage;
use crate::websocket::handshake::{self, accept_upgrade};

/// Subprotocol echoed back to clients that ask for it.
pub const HUB_PROTOCOL: &str = "hub-events";

#[derive(Debug, Serialize)]
struct Status {
    status: &'static str,
    uptime_secs: u64,
    connections: usize,
}

#[derive(Debug, Deserialize)]
struct ClientEvent {
    event: String,
    requestid: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ResponseEvent {
    event: &'static str,
    requestid: u64,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct DeviceEvent<'a> {
    event: &'static str,
    device: &'a str,
    state: &'a str,
}

/// A device state change, ready to broadcast to every event-stream client.
pub fn device_event(device: &str, state: &str) -> PushMessage {
    let event = DeviceEvent {
        event: "device",
        device,
        state,
    };
    PushMessage::Text(serde_json::to_string(&event).unwrap_or_default())
}

pub struct HubHandler {
    started: Instant,
    manager: ConnectionManager,
}

impl HubHandler {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            started: Instant::now(),
            manager,
        }
    }

    fn status(&self) -> Response<Bytes> {
        let status = Status {
            status: "OK",
            uptime_secs: self.started.elapsed().as_secs(),
            connections: self.manager.len(),
        };
        match serde_json::to_vec(&status) {
            Ok(body) => {
                let mut response = Response::new(Bytes::from(body));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize status");
                stock_reply(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    fn upgrade(&self, request: &Request<Bytes>) -> Response<Bytes> {
        if !handshake::is_upgrade_request(request) {
            return stock_reply(StatusCode::BAD_REQUEST);
        }
        match accept_upgrade(request, &[HUB_PROTOCOL]) {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "Rejected WebSocket upgrade");
                stock_reply(StatusCode::BAD_REQUEST)
            }
        }
    }
}

impl RequestHandler for HubHandler {
    fn handle(&self, request: &Request<Bytes>) -> Response<Bytes> {
        match (request.method(), request.uri().path()) {
            (&Method::GET, "/json") => self.status(),
            (_, "/ws") => self.upgrade(request),
            _ => stock_reply(StatusCode::NOT_FOUND),
        }
    }

    fn on_message(&self, peer: &PeerInfo, message: PushMessage) -> Option<PushMessage> {
        let text = match message {
            PushMessage::Text(text) => text,
            PushMessage::Binary(_) => return None,
        };
        let event: ClientEvent = match serde_json::from_str(&text) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(connection_id = %peer.id, error = %e, "Ignoring non-JSON message");
                return None;
            }
        };
        match (event.event.as_str(), event.requestid) {
            ("request", Some(requestid)) => {
                let reply = ResponseEvent {
                    event: "response",
                    requestid,
                    status: "OK",
                };
                serde_json::to_string(&reply).ok().map(PushMessage::Text)
            }
            _ => None,
        }
    }
}
