//! Byte transport over a plain or TLS socket.
//!
//! # Responsibilities
//! - Perform the connect-time handshake (no-op for plain sockets)
//! - Read whatever bytes are available into the connection's buffer
//! - Write whole buffers and half-close the socket
//!
//! # Design Decisions
//! - One owned value with `Plain`/`Secure` variants, chosen once at accept time
//! - Generic over the stream so the state machine can run on in-memory pipes
//! - Split into reader/writer halves so one read and one write can be
//!   outstanding at the same time

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::net::error::TransportError;

/// Encryption setting of a listening endpoint.
#[derive(Clone)]
pub enum Security {
    Plain,
    Tls(TlsAcceptor),
}

impl Security {
    pub fn is_secure(&self) -> bool {
        matches!(self, Security::Tls(_))
    }
}

impl fmt::Debug for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Security::Plain => f.write_str("Plain"),
            Security::Tls(_) => f.write_str("Tls"),
        }
    }
}

/// A client byte stream after its handshake has completed.
pub enum Transport<S = TcpStream> {
    Plain(S),
    Secure(Box<TlsStream<S>>),
}

/// Result of a single read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were appended to the buffer.
    Data(usize),
    /// The peer closed its sending side.
    Closed,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Complete the connect-time handshake for `security`.
    ///
    /// Must finish before any application byte is read or written.
    pub async fn handshake(
        stream: S,
        security: &Security,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        match security {
            Security::Plain => Ok(Transport::Plain(stream)),
            Security::Tls(acceptor) => {
                match tokio::time::timeout(timeout, acceptor.accept(stream)).await {
                    Ok(Ok(tls)) => Ok(Transport::Secure(Box::new(tls))),
                    Ok(Err(e)) => Err(TransportError::Handshake(e)),
                    Err(_) => Err(TransportError::HandshakeTimeout(timeout)),
                }
            }
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Transport::Secure(_))
    }

    /// Split into independently usable read and write halves.
    pub fn into_split(self) -> (TransportReader<S>, TransportWriter<S>) {
        let (read, write) = tokio::io::split(self);
        (TransportReader { inner: read }, TransportWriter { inner: write })
    }
}

impl<S> AsyncRead for Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Secure(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl<S> AsyncWrite for Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Secure(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Secure(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Secure(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Read half of a [`Transport`].
pub struct TransportReader<S = TcpStream> {
    inner: ReadHalf<Transport<S>>,
}

impl<S> TransportReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Append up to `chunk` bytes to `buf`.
    ///
    /// Cancel-safe: if the future is dropped before completion no bytes are lost.
    pub async fn read_some(
        &mut self,
        buf: &mut BytesMut,
        chunk: usize,
    ) -> Result<ReadOutcome, TransportError> {
        buf.reserve(chunk);
        let mut limited = (&mut self.inner).take(chunk as u64);
        match limited.read_buf(buf).await {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) => Err(TransportError::Read(e)),
        }
    }
}

/// Write half of a [`Transport`].
pub struct TransportWriter<S = TcpStream> {
    inner: WriteHalf<Transport<S>>,
}

impl<S> TransportWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Write the whole buffer and flush it.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.inner.write_all(bytes).await.map_err(TransportError::Write)?;
        self.inner.flush().await.map_err(TransportError::Write)
    }

    /// Half-close the connection. Errors are ignored.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.inner.shutdown().await {
            tracing::trace!(error = %e, "Transport shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_handshake_is_passthrough() {
        let (server, mut client) = tokio::io::duplex(64);
        let transport = Transport::handshake(server, &Security::Plain, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!transport.is_secure());

        let (mut reader, mut writer) = transport.into_split();
        client.write_all(b"ping").await.unwrap();

        let mut buf = BytesMut::new();
        let outcome = reader.read_some(&mut buf, 4096).await.unwrap();
        assert_eq!(outcome, ReadOutcome::Data(4));
        assert_eq!(&buf[..], b"ping");

        writer.write_all(b"pong").await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");
    }

    #[tokio::test]
    async fn read_some_respects_chunk_size() {
        let (server, mut client) = tokio::io::duplex(64);
        let (mut reader, _writer) = Transport::Plain(server).into_split();
        client.write_all(b"0123456789").await.unwrap();

        let mut buf = BytesMut::new();
        assert_eq!(reader.read_some(&mut buf, 4).await.unwrap(), ReadOutcome::Data(4));
        assert_eq!(reader.read_some(&mut buf, 4).await.unwrap(), ReadOutcome::Data(4));
        assert_eq!(&buf[..], b"01234567");
    }

    #[tokio::test]
    async fn read_some_reports_eof() {
        let (server, client) = tokio::io::duplex(64);
        let (mut reader, _writer) = Transport::Plain(server).into_split();
        drop(client);

        let mut buf = BytesMut::new();
        assert_eq!(reader.read_some(&mut buf, 16).await.unwrap(), ReadOutcome::Closed);
    }

    #[tokio::test]
    async fn shutdown_signals_eof_to_peer() {
        let (server, mut client) = tokio::io::duplex(64);
        let (_reader, mut writer) = Transport::Plain(server).into_split();
        writer.shutdown().await;

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
