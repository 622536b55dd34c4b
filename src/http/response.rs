//! Response serialization.
//!
//! # Responsibilities
//! - Serialize a response into HTTP/1.1 wire bytes
//! - Fill in `Content-Length` and `Connection` when the handler left them out
//! - Provide the stock replies the connection synthesizes itself
//!
//! # Design Decisions
//! - HEAD responses keep their headers but drop the body
//! - 101 responses are written as-is; the upgraded protocol owns the stream

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, Method, Response, StatusCode};

/// True when the response switches the connection to another protocol.
pub fn is_upgrade<B>(response: &Response<B>) -> bool {
    response.status() == StatusCode::SWITCHING_PROTOCOLS
}

/// Serialize `response` as the answer to a `method` request.
pub fn serialize(response: &Response<Bytes>, method: &Method, keep_alive: bool) -> Bytes {
    let status = response.status();
    let body = response.body();
    let mut out = BytesMut::with_capacity(256 + body.len());

    out.put_slice(b"HTTP/1.1 ");
    out.put_slice(status.as_str().as_bytes());
    out.put_u8(b' ');
    out.put_slice(status.canonical_reason().unwrap_or("Unknown").as_bytes());
    out.put_slice(b"\r\n");

    for (name, value) in response.headers() {
        out.put_slice(name.as_str().as_bytes());
        out.put_slice(b": ");
        out.put_slice(value.as_bytes());
        out.put_slice(b"\r\n");
    }

    let upgrade = is_upgrade(response);
    let bodiless = upgrade
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
        || status.is_informational();

    if !bodiless && !response.headers().contains_key(CONTENT_LENGTH) {
        out.put_slice(b"content-length: ");
        out.put_slice(body.len().to_string().as_bytes());
        out.put_slice(b"\r\n");
    }
    if !upgrade && !response.headers().contains_key(CONNECTION) {
        out.put_slice(if keep_alive {
            b"connection: keep-alive\r\n".as_slice()
        } else {
            b"connection: close\r\n".as_slice()
        });
    }
    out.put_slice(b"\r\n");

    if !bodiless && *method != Method::HEAD {
        out.put_slice(body);
    }
    out.freeze()
}

/// A small HTML reply for `status`, as sent for errors the connection detects itself.
pub fn stock_reply(status: StatusCode) -> Response<Bytes> {
    let reason = status.canonical_reason().unwrap_or("Error");
    let body = format!(
        "<html><head><title>{reason}</title></head><body><h1>{code} {reason}</h1></body></html>",
        reason = reason,
        code = status.as_u16()
    );
    let mut response = Response::new(Bytes::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
    response
}

/// The reply sent when a request cannot be parsed.
pub fn bad_request() -> Response<Bytes> {
    stock_reply(StatusCode::BAD_REQUEST)
}
