//! Request decoding.
//!
//! # Responsibilities
//! - Turn accumulated bytes into a complete request, "need more", or an error
//! - Derive keep-alive from the `Connection` header
//! - Normalize the peer address attached to each request
//!
//! # Design Decisions
//! - Stateless: the whole buffer is re-parsed on every read, so the result
//!   does not depend on where the stream was split into chunks
//! - Bodies are framed by `Content-Length` only

use std::net::IpAddr;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{Method, Request, Version};
use thiserror::Error;

/// Maximum number of header lines accepted in one request.
pub const MAX_HEADERS: usize = 64;

/// Remote host of the client, attached to every dispatched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost(pub String);

/// Keep-alive decision for the request's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive(pub bool);

/// Why a request could not be decoded.
#[derive(Debug, Error)]
pub enum HttpParseError {
    #[error("invalid request head: {0}")]
    Head(#[from] httparse::Error),

    #[error("request exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("invalid Content-Length header")]
    ContentLength,

    #[error("Transfer-Encoding bodies are not supported")]
    TransferEncoding,

    #[error("invalid {0}")]
    Invalid(&'static str),
}

/// Outcome of one decode attempt.
#[derive(Debug)]
pub enum HttpDecode {
    /// A full request; `consumed` bytes belong to it.
    Complete {
        request: Request<Bytes>,
        consumed: usize,
    },
    /// The buffer holds a prefix of a request.
    Incomplete,
    /// The buffer can never become a valid request.
    Malformed(HttpParseError),
}

/// Decode the first request in `buf`.
///
/// `max_bytes` bounds the head and the body separately.
pub fn decode(buf: &[u8], max_bytes: usize) -> HttpDecode {
    match try_decode(buf, max_bytes) {
        Ok(Some((request, consumed))) => HttpDecode::Complete { request, consumed },
        Ok(None) => HttpDecode::Incomplete,
        Err(e) => HttpDecode::Malformed(e),
    }
}

fn try_decode(
    buf: &[u8],
    max_bytes: usize,
) -> Result<Option<(Request<Bytes>, usize)>, HttpParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);

    let head_len = match parsed.parse(buf)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => {
            if buf.len() > max_bytes {
                return Err(HttpParseError::TooLarge { limit: max_bytes });
            }
            return Ok(None);
        }
    };
    if head_len > max_bytes {
        return Err(HttpParseError::TooLarge { limit: max_bytes });
    }

    let method = parsed.method.ok_or(HttpParseError::Invalid("method"))?;
    let path = parsed.path.ok_or(HttpParseError::Invalid("path"))?;
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => return Err(HttpParseError::Invalid("version")),
    };

    let mut builder = Request::builder()
        .method(Method::from_bytes(method.as_bytes()).map_err(|_| HttpParseError::Invalid("method"))?)
        .uri(path)
        .version(version);

    let mut content_length = 0usize;
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| HttpParseError::Invalid("header name"))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| HttpParseError::Invalid("header value"))?;

        if name == CONTENT_LENGTH {
            content_length = value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .ok_or(HttpParseError::ContentLength)?;
        } else if name == TRANSFER_ENCODING {
            return Err(HttpParseError::TransferEncoding);
        }
        builder = builder.header(name, value);
    }

    if content_length > max_bytes {
        return Err(HttpParseError::TooLarge { limit: max_bytes });
    }
    let total = head_len + content_length;
    if buf.len() < total {
        return Ok(None);
    }

    let body = Bytes::copy_from_slice(&buf[head_len..total]);
    let request = builder
        .body(body)
        .map_err(|_| HttpParseError::Invalid("request target"))?;
    Ok(Some((request, total)))
}

/// True when the `Connection` header carries a `keep-alive` token.
pub fn wants_keep_alive<B>(request: &Request<B>) -> bool {
    request
        .headers()
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("keep-alive"))
}

/// Render a peer IP, stripping the IPv4-mapped IPv6 prefix (`::ffff:`).
pub fn normalize_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        IpAddr::V4(v4) => v4.to_string(),
    }
}
