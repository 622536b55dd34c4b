//! WebSocket frame codec (server side).
//!
//! # Responsibilities
//! - Decode masked client frames from the connection's read buffer
//! - Reassemble fragmented messages, interleaving control frames
//! - Encode unmasked server frames (messages, pong, ping probe, close)
//!
//! # Design Decisions
//! - One decoder per connection; it only keeps the partial message
//! - Sizes are checked from the header, before the payload is buffered
//! - Opcodes and close codes reuse tungstenite's coding types

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{CloseCode, Control, Data, OpCode};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// An application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    Text(String),
    Binary(Bytes),
}

impl PushMessage {
    pub fn len(&self) -> usize {
        match self {
            PushMessage::Text(t) => t.len(),
            PushMessage::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One decoded unit handed to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Message(PushMessage),
    Ping(Bytes),
    Pong(Bytes),
    /// Peer-initiated close, with its status code and reason if present.
    Close(Option<(u16, String)>),
}

/// Protocol violations by the client.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("client frames must be masked")]
    Unmasked,

    #[error("reserved bits set without a negotiated extension")]
    ReservedBits,

    #[error("reserved opcode {0}")]
    ReservedOpcode(u8),

    #[error("control frames must not be fragmented")]
    FragmentedControl,

    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlTooLong(usize),

    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    #[error("new data frame while a fragmented message is in progress")]
    ExpectedContinuation,

    #[error("malformed close frame payload")]
    InvalidClosePayload,

    #[error("text message is not valid UTF-8")]
    InvalidUtf8,

    #[error("message of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: u64, limit: usize },
}

impl FrameError {
    /// Close code to report back to the peer.
    pub fn close_code(&self) -> CloseCode {
        match self {
            FrameError::InvalidUtf8 => CloseCode::Invalid,
            FrameError::TooLarge { .. } => CloseCode::Size,
            _ => CloseCode::Protocol,
        }
    }
}

/// Outcome of one decode attempt.
#[derive(Debug)]
pub enum FrameDecode {
    /// At least one whole frame was consumed.
    Messages {
        events: Vec<PushEvent>,
        consumed: usize,
        keep_alive: bool,
    },
    /// Not even one whole frame is buffered.
    Incomplete,
    Error(FrameError),
}

struct RawFrame {
    fin: bool,
    opcode: OpCode,
    payload: Bytes,
}

enum Partial {
    Text(BytesMut),
    Binary(BytesMut),
}

impl Partial {
    fn buf(&mut self) -> &mut BytesMut {
        match self {
            Partial::Text(b) | Partial::Binary(b) => b,
        }
    }
}

/// Per-connection frame decoder.
pub struct FrameDecoder {
    max_message: usize,
    partial: Option<Partial>,
}

impl FrameDecoder {
    pub fn new(max_message: usize) -> Self {
        Self {
            max_message,
            partial: None,
        }
    }

    /// Decode as many whole frames from `buf` as possible.
    ///
    /// Decoding stops after a close frame, which also turns `keep_alive` off.
    pub fn parse(&mut self, buf: &[u8], keep_alive: bool) -> FrameDecode {
        let mut keep_alive = keep_alive;
        let mut events = Vec::new();
        let mut offset = 0;

        while keep_alive {
            match parse_frame(&buf[offset..], self.max_message) {
                Ok(Some((frame, len))) => {
                    offset += len;
                    if let Err(e) = self.accept(frame, &mut events, &mut keep_alive) {
                        return FrameDecode::Error(e);
                    }
                }
                Ok(None) => break,
                Err(e) => return FrameDecode::Error(e),
            }
        }

        if offset == 0 {
            FrameDecode::Incomplete
        } else {
            FrameDecode::Messages {
                events,
                consumed: offset,
                keep_alive,
            }
        }
    }

    fn accept(
        &mut self,
        frame: RawFrame,
        events: &mut Vec<PushEvent>,
        keep_alive: &mut bool,
    ) -> Result<(), FrameError> {
        match frame.opcode {
            OpCode::Data(Data::Continue) => {
                let partial = self.partial.as_mut().ok_or(FrameError::UnexpectedContinuation)?;
                let size = partial.buf().len() + frame.payload.len();
                if size > self.max_message {
                    return Err(FrameError::TooLarge {
                        size: size as u64,
                        limit: self.max_message,
                    });
                }
                partial.buf().put_slice(&frame.payload);
                if frame.fin {
                    if let Some(done) = self.partial.take() {
                        events.push(PushEvent::Message(finish(done)?));
                    }
                }
            }
            OpCode::Data(kind @ (Data::Text | Data::Binary)) => {
                if self.partial.is_some() {
                    return Err(FrameError::ExpectedContinuation);
                }
                let started = BytesMut::from(&frame.payload[..]);
                let partial = if kind == Data::Text {
                    Partial::Text(started)
                } else {
                    Partial::Binary(started)
                };
                if frame.fin {
                    events.push(PushEvent::Message(finish(partial)?));
                } else {
                    self.partial = Some(partial);
                }
            }
            OpCode::Data(Data::Reserved(code)) | OpCode::Control(Control::Reserved(code)) => {
                return Err(FrameError::ReservedOpcode(code));
            }
            OpCode::Control(Control::Ping) => events.push(PushEvent::Ping(frame.payload)),
            OpCode::Control(Control::Pong) => events.push(PushEvent::Pong(frame.payload)),
            OpCode::Control(Control::Close) => {
                events.push(PushEvent::Close(parse_close(&frame.payload)?));
                *keep_alive = false;
            }
        }
        Ok(())
    }
}

fn finish(partial: Partial) -> Result<PushMessage, FrameError> {
    match partial {
        Partial::Text(buf) => String::from_utf8(buf.to_vec())
            .map(PushMessage::Text)
            .map_err(|_| FrameError::InvalidUtf8),
        Partial::Binary(buf) => Ok(PushMessage::Binary(buf.freeze())),
    }
}

fn parse_close(payload: &[u8]) -> Result<Option<(u16, String)>, FrameError> {
    match payload.len() {
        0 => Ok(None),
        1 => Err(FrameError::InvalidClosePayload),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            if !CloseCode::from(code).is_allowed() {
                return Err(FrameError::InvalidClosePayload);
            }
            let reason = std::str::from_utf8(&payload[2..]).map_err(|_| FrameError::InvalidUtf8)?;
            Ok(Some((code, reason.to_string())))
        }
    }
}

/// Parse one frame from the front of `buf`. `Ok(None)` means more bytes are needed.
fn parse_frame(buf: &[u8], max_message: usize) -> Result<Option<(RawFrame, usize)>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let fin = buf[0] & 0x80 != 0;
    if buf[0] & 0x70 != 0 {
        return Err(FrameError::ReservedBits);
    }
    let opcode = OpCode::from(buf[0] & 0x0F);
    if buf[1] & 0x80 == 0 {
        return Err(FrameError::Unmasked);
    }

    let (len, mut pos) = match buf[1] & 0x7F {
        126 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
        }
        127 => {
            if buf.len() < 10 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(raw), 10)
        }
        n => (n as u64, 2),
    };

    if let OpCode::Control(_) = opcode {
        if !fin {
            return Err(FrameError::FragmentedControl);
        }
        if len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(FrameError::ControlTooLong(len as usize));
        }
    }
    if len > max_message as u64 {
        return Err(FrameError::TooLarge {
            size: len,
            limit: max_message,
        });
    }
    let len = len as usize;

    if buf.len() < pos + 4 {
        return Ok(None);
    }
    let mask = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
    pos += 4;
    if buf.len() < pos + len {
        return Ok(None);
    }

    let mut payload = BytesMut::from(&buf[pos..pos + len]);
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }

    Ok(Some((
        RawFrame {
            fin,
            opcode,
            payload: payload.freeze(),
        },
        pos + len,
    )))
}

/// Encode a single unmasked, final frame.
pub fn encode_frame(opcode: OpCode, payload: &[u8]) -> Bytes {
    let len = payload.len();
    let mut out = BytesMut::with_capacity(len + 10);
    out.put_u8(0x80 | u8::from(opcode));
    if len < 126 {
        out.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        out.put_u8(126);
        out.put_u16(len as u16);
    } else {
        out.put_u8(127);
        out.put_u64(len as u64);
    }
    out.put_slice(payload);
    out.freeze()
}

pub fn encode_message(message: &PushMessage) -> Bytes {
    match message {
        PushMessage::Text(text) => encode_frame(OpCode::Data(Data::Text), text.as_bytes()),
        PushMessage::Binary(data) => encode_frame(OpCode::Data(Data::Binary), data),
    }
}

pub fn build_pong(payload: &[u8]) -> Bytes {
    encode_frame(OpCode::Control(Control::Pong), payload)
}

/// The ping sent when a pushed connection has been silent for a full window.
pub fn build_liveness_probe() -> Bytes {
    encode_frame(OpCode::Control(Control::Ping), &[])
}

/// A close frame; the reason is cut to fit a control frame.
pub fn build_close_frame(code: CloseCode, reason: &str) -> Bytes {
    let mut end = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    let mut payload = Vec::with_capacity(2 + end);
    payload.extend_from_slice(&u16::from(code).to_be_bytes());
    payload.extend_from_slice(&reason.as_bytes()[..end]);
    encode_frame(OpCode::Control(Control::Close), &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    /// A masked frame as a browser would send it.
    fn client_frame(first: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![first];
        let len = payload.len();
        if len < 126 {
            out.push(0x80 | len as u8);
        } else if len <= u16::MAX as usize {
            out.push(0x80 | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(0x80 | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
        out.extend_from_slice(&MASK);
        out.extend(payload.iter().enumerate().map(|(i, b)| b ^ MASK[i % 4]));
        out
    }

    fn text_frame(text: &str) -> Vec<u8> {
        client_frame(0x81, text.as_bytes())
    }

    fn expect_events(decode: FrameDecode) -> (Vec<PushEvent>, usize, bool) {
        match decode {
            FrameDecode::Messages {
                events,
                consumed,
                keep_alive,
            } => (events, consumed, keep_alive),
            other => panic!("expected messages, got {:?}", other),
        }
    }

    #[test]
    fn test_single_text_message() {
        let mut decoder = FrameDecoder::new(1024);
        let frame = text_frame("Hello");
        let (events, consumed, keep_alive) = expect_events(decoder.parse(&frame, true));

        assert_eq!(events, vec![PushEvent::Message(PushMessage::Text("Hello".into()))]);
        assert_eq!(consumed, frame.len());
        assert!(keep_alive);
    }

    #[test]
    fn test_partial_frame_is_incomplete() {
        let mut decoder = FrameDecoder::new(1024);
        let frame = text_frame("Hello");
        for cut in 0..frame.len() {
            assert!(matches!(decoder.parse(&frame[..cut], true), FrameDecode::Incomplete));
        }
    }

    #[test]
    fn test_trailing_partial_frame_is_left_unconsumed() {
        let mut decoder = FrameDecoder::new(1024);
        let mut buf = text_frame("one");
        let first = buf.len();
        buf.extend_from_slice(&text_frame("two")[..4]);

        let (events, consumed, _) = expect_events(decoder.parse(&buf, true));
        assert_eq!(events.len(), 1);
        assert_eq!(consumed, first);
    }

    #[test]
    fn test_fragmented_message_with_interleaved_ping() {
        let mut decoder = FrameDecoder::new(1024);
        let mut buf = client_frame(0x01, b"Hel");
        buf.extend(client_frame(0x89, b"?"));
        buf.extend(client_frame(0x80, b"lo"));

        let (events, consumed, _) = expect_events(decoder.parse(&buf, true));
        assert_eq!(consumed, buf.len());
        assert_eq!(
            events,
            vec![
                PushEvent::Ping(Bytes::from_static(b"?")),
                PushEvent::Message(PushMessage::Text("Hello".into())),
            ]
        );
    }

    #[test]
    fn test_fragments_across_reads() {
        let mut decoder = FrameDecoder::new(1024);
        let (events, _, _) = expect_events(decoder.parse(&client_frame(0x02, &[1, 2]), true));
        assert!(events.is_empty());

        let (events, _, _) = expect_events(decoder.parse(&client_frame(0x80, &[3]), true));
        assert_eq!(
            events,
            vec![PushEvent::Message(PushMessage::Binary(Bytes::from_static(&[1, 2, 3])))]
        );
    }

    #[test]
    fn test_close_frame_turns_keep_alive_off_and_stops() {
        let mut decoder = FrameDecoder::new(1024);
        let mut close_payload = 1000u16.to_be_bytes().to_vec();
        close_payload.extend_from_slice(b"bye");
        let mut buf = client_frame(0x88, &close_payload);
        let close_len = buf.len();
        buf.extend(text_frame("after close"));

        let (events, consumed, keep_alive) = expect_events(decoder.parse(&buf, true));
        assert_eq!(events, vec![PushEvent::Close(Some((1000, "bye".into())))]);
        assert_eq!(consumed, close_len);
        assert!(!keep_alive);
    }

    #[test]
    fn test_protocol_violations() {
        let mut decoder = FrameDecoder::new(1024);

        // Unmasked.
        assert!(matches!(
            decoder.parse(&[0x81, 0x01, b'a'], true),
            FrameDecode::Error(FrameError::Unmasked)
        ));
        // RSV1 set.
        assert!(matches!(
            decoder.parse(&client_frame(0xC1, b"a"), true),
            FrameDecode::Error(FrameError::ReservedBits)
        ));
        // Reserved opcode 0x3.
        assert!(matches!(
            decoder.parse(&client_frame(0x83, b"a"), true),
            FrameDecode::Error(FrameError::ReservedOpcode(3))
        ));
        // Fragmented ping.
        assert!(matches!(
            decoder.parse(&client_frame(0x09, b""), true),
            FrameDecode::Error(FrameError::FragmentedControl)
        ));
        // Continuation with nothing started.
        assert!(matches!(
            decoder.parse(&client_frame(0x80, b"x"), true),
            FrameDecode::Error(FrameError::UnexpectedContinuation)
        ));
        // One-byte close payload.
        assert!(matches!(
            decoder.parse(&client_frame(0x88, &[3]), true),
            FrameDecode::Error(FrameError::InvalidClosePayload)
        ));
    }

    #[test]
    fn test_control_frame_too_long() {
        let mut decoder = FrameDecoder::new(1024);
        let frame = client_frame(0x89, &[0u8; 126]);
        assert!(matches!(
            decoder.parse(&frame, true),
            FrameDecode::Error(FrameError::ControlTooLong(126))
        ));
    }

    #[test]
    fn test_oversized_message_rejected_from_header() {
        let mut decoder = FrameDecoder::new(16);
        let frame = client_frame(0x82, &[0u8; 200]);
        // Only the header is buffered; the limit is enforced already.
        let decode = decoder.parse(&frame[..8], true);
        match decode {
            FrameDecode::Error(e) => {
                assert_eq!(e, FrameError::TooLarge { size: 200, limit: 16 });
                assert_eq!(e.close_code(), CloseCode::Size);
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8_text() {
        let mut decoder = FrameDecoder::new(1024);
        match decoder.parse(&client_frame(0x81, &[0xff, 0xfe]), true) {
            FrameDecode::Error(e) => assert_eq!(e.close_code(), CloseCode::Invalid),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_server_frames_are_unmasked() {
        assert_eq!(&build_liveness_probe()[..], &[0x89, 0x00]);
        assert_eq!(&build_pong(b"hi")[..], &[0x8A, 0x02, b'h', b'i']);
        assert_eq!(
            &build_close_frame(CloseCode::Normal, "")[..],
            &[0x88, 0x02, 0x03, 0xE8]
        );

        let long = encode_message(&PushMessage::Binary(Bytes::from(vec![7u8; 300])));
        assert_eq!(&long[..4], &[0x82, 126, 0x01, 0x2C]);
        assert_eq!(long.len(), 304);
    }

    #[test]
    fn test_close_reason_is_truncated_to_control_limit() {
        let reason = "x".repeat(400);
        let frame = build_close_frame(CloseCode::Away, &reason);
        assert_eq!(frame[1] as usize, MAX_CONTROL_PAYLOAD);
    }
}
