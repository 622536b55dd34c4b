//! Outbound write serialization.
//!
//! # Responsibilities
//! - Keep at most one buffer in flight on a connection
//! - Queue later buffers and release them in FIFO order
//! - Tell the connection when the queue has drained
//! - Account for the bytes waiting behind the in-flight write
//!
//! # Design Decisions
//! - Pure state machine; the connection performs the actual I/O
//! - Owned by the connection task, so no lock is needed

use std::collections::VecDeque;

use bytes::Bytes;

use crate::net::error::ConnectionError;

/// What the connection should do after a write completes.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteStep {
    /// Start writing this buffer; it is now in flight.
    Next(Bytes),
    /// Queue drained on a keep-alive connection.
    Idle,
    /// Queue drained and the connection is not keep-alive: half-close.
    HalfClose,
    /// The write failed; tear the connection down.
    Failed,
}

/// FIFO of pending writes with a single in-flight slot.
#[derive(Debug, Default)]
pub struct WriteQueue {
    pending: VecDeque<Bytes>,
    pending_bytes: usize,
    in_flight: bool,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `bytes` for writing.
    ///
    /// Returns the buffer back when nothing is in flight; the caller must start
    /// writing it immediately. Otherwise the buffer waits at the tail.
    #[must_use = "a returned buffer has to be written"]
    pub fn enqueue(&mut self, bytes: Bytes) -> Option<Bytes> {
        if self.in_flight {
            self.pending_bytes += bytes.len();
            self.pending.push_back(bytes);
            None
        } else {
            self.in_flight = true;
            Some(bytes)
        }
    }

    /// Record completion of the in-flight write.
    pub fn on_write_complete(
        &mut self,
        ok: bool,
        keep_alive: bool,
    ) -> Result<WriteStep, ConnectionError> {
        if !self.in_flight {
            return Err(ConnectionError::QueueInvariantViolation(
                "write completed with nothing in flight",
            ));
        }
        if !ok {
            self.in_flight = false;
            self.pending.clear();
            self.pending_bytes = 0;
            return Ok(WriteStep::Failed);
        }
        match self.pending.pop_front() {
            Some(next) => {
                self.pending_bytes -= next.len();
                Ok(WriteStep::Next(next))
            }
            None => {
                self.in_flight = false;
                if keep_alive {
                    Ok(WriteStep::Idle)
                } else {
                    Ok(WriteStep::HalfClose)
                }
            }
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Buffers waiting behind the in-flight one.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Total size of the buffers waiting behind the in-flight one.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// Nothing in flight and nothing waiting.
    pub fn is_drained(&self) -> bool {
        !self.in_flight && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn first_enqueue_starts_immediately() {
        let mut q = WriteQueue::new();
        assert_eq!(q.enqueue(b("a")), Some(b("a")));
        assert!(q.in_flight());
        assert_eq!(q.enqueue(b("b")), None);
        assert_eq!(q.pending(), 1);
    }

    #[test]
    fn drains_in_fifo_order() {
        let mut q = WriteQueue::new();
        let first = q.enqueue(b("1")).unwrap();
        for s in ["2", "3", "4"] {
            assert!(q.enqueue(b(s)).is_none());
        }

        let mut written = vec![first];
        loop {
            match q.on_write_complete(true, true).unwrap() {
                WriteStep::Next(buf) => written.push(buf),
                WriteStep::Idle => break,
                other => panic!("unexpected step {:?}", other),
            }
        }
        assert_eq!(written, vec![b("1"), b("2"), b("3"), b("4")]);
        assert!(q.is_drained());
    }

    #[test]
    fn never_more_than_one_in_flight() {
        // Interleave bursts of enqueues with completions and count what the
        // queue hands out for writing.
        let mut q = WriteQueue::new();
        let mut outstanding = 0usize;
        let mut handed_out = Vec::new();

        for round in 0..50u32 {
            for i in 0..(round % 4 + 1) {
                if let Some(buf) = q.enqueue(Bytes::from(format!("{}-{}", round, i))) {
                    outstanding += 1;
                    handed_out.push(buf);
                }
                assert!(outstanding <= 1);
            }
            if round % 3 == 0 {
                outstanding -= 1;
                if let WriteStep::Next(buf) = q.on_write_complete(true, true).unwrap() {
                    outstanding += 1;
                    handed_out.push(buf);
                }
                assert!(outstanding <= 1);
            }
        }
        while q.in_flight() {
            if let WriteStep::Next(buf) = q.on_write_complete(true, true).unwrap() {
                handed_out.push(buf);
            }
        }

        let expected: Vec<Bytes> = (0..50u32)
            .flat_map(|r| (0..(r % 4 + 1)).map(move |i| Bytes::from(format!("{}-{}", r, i))))
            .collect();
        assert_eq!(handed_out, expected);
    }

    #[test]
    fn pending_bytes_follow_the_queue() {
        let mut q = WriteQueue::new();
        let _ = q.enqueue(b("in flight"));
        assert_eq!(q.pending_bytes(), 0);
        let _ = q.enqueue(b("abc"));
        let _ = q.enqueue(b("defgh"));
        assert_eq!(q.pending_bytes(), 8);

        assert_eq!(q.on_write_complete(true, true).unwrap(), WriteStep::Next(b("abc")));
        assert_eq!(q.pending_bytes(), 5);

        assert_eq!(q.on_write_complete(false, true).unwrap(), WriteStep::Failed);
        assert_eq!(q.pending_bytes(), 0);
    }

    #[test]
    fn drained_non_keep_alive_requests_half_close() {
        let mut q = WriteQueue::new();
        let _ = q.enqueue(b("response"));
        assert_eq!(q.on_write_complete(true, false).unwrap(), WriteStep::HalfClose);
    }

    #[test]
    fn failure_discards_pending() {
        let mut q = WriteQueue::new();
        let _ = q.enqueue(b("a"));
        let _ = q.enqueue(b("b"));
        assert_eq!(q.on_write_complete(false, true).unwrap(), WriteStep::Failed);
        assert!(q.is_drained());
    }

    #[test]
    fn completion_without_write_is_invariant_violation() {
        let mut q = WriteQueue::new();
        let err = q.on_write_complete(true, true).unwrap_err();
        assert!(matches!(err, ConnectionError::QueueInvariantViolation(_)));
    }
}
