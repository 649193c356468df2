//! Chunked message assembly.
//!
//! A logical OPC UA message larger than the negotiated send buffer travels as
//! a series of `C` chunks closed by an `F` chunk, or is thrown away by an `A`
//! chunk. The assembler keeps one in-flight buffer per request id on its
//! channel and enforces the negotiated limits; any violation is fatal for the
//! whole channel, not just the message.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::status::StatusCode;
use crate::wire::IsFinal;

/// Limits negotiated in HEL/ACK, applied per logical message.
#[derive(Debug, Clone, Copy)]
pub struct ChunkLimits {
    /// Maximum chunks per message. 0 means unlimited.
    pub max_chunk_count: u32,
    /// Maximum reassembled body size. 0 means unlimited.
    pub max_message_size: u32,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        ChunkLimits {
            max_chunk_count: 64,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("message exceeds {limit} chunks")]
    TooManyChunks { limit: u32 },

    #[error("reassembled body {size} exceeds limit {limit}")]
    MessageTooLarge { size: usize, limit: u32 },
}

impl ChunkError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChunkError::TooManyChunks { .. } => StatusCode::BAD_TCP_MESSAGE_TOO_LARGE,
            ChunkError::MessageTooLarge { .. } => StatusCode::BAD_TCP_MESSAGE_TOO_LARGE,
        }
    }
}

/// Outcome of feeding one chunk into the assembler.
#[derive(Debug)]
pub enum Assembly {
    /// More chunks expected for this request id.
    Incomplete,
    /// The message is complete.
    Complete(Bytes),
    /// The sender abandoned the message; in-flight state is discarded.
    Aborted,
}

/// Reassembles chunked messages for a single secure channel.
pub struct ChunkAssembler {
    in_flight: HashMap<u32, InFlight>,
    limits: ChunkLimits,
    aborted_count: u64,
}

struct InFlight {
    body: BytesMut,
    chunks: u32,
}

impl ChunkAssembler {
    pub fn new(limits: ChunkLimits) -> Self {
        ChunkAssembler {
            in_flight: HashMap::new(),
            limits,
            aborted_count: 0,
        }
    }

    pub fn set_limits(&mut self, limits: ChunkLimits) {
        self.limits = limits;
    }

    /// Number of messages abandoned with an `A` chunk so far.
    pub fn aborted_count(&self) -> u64 {
        self.aborted_count
    }

    /// Feed one chunk body (already stripped of headers and security).
    pub fn push(
        &mut self,
        is_final: IsFinal,
        request_id: u32,
        fragment: &[u8],
    ) -> Result<Assembly, ChunkError> {
        if is_final == IsFinal::Aborted {
            self.in_flight.remove(&request_id);
            self.aborted_count += 1;
            return Ok(Assembly::Aborted);
        }

        // Single-chunk fast path: nothing buffered for this request
        if is_final == IsFinal::Final && !self.in_flight.contains_key(&request_id) {
            self.check_size(fragment.len())?;
            return Ok(Assembly::Complete(Bytes::copy_from_slice(fragment)));
        }

        let entry = self.in_flight.entry(request_id).or_insert_with(|| InFlight {
            body: BytesMut::new(),
            chunks: 0,
        });
        entry.chunks += 1;
        if self.limits.max_chunk_count != 0 && entry.chunks > self.limits.max_chunk_count {
            let limit = self.limits.max_chunk_count;
            self.in_flight.remove(&request_id);
            return Err(ChunkError::TooManyChunks { limit });
        }
        let new_size = entry.body.len() + fragment.len();
        if self.limits.max_message_size != 0 && new_size > self.limits.max_message_size as usize {
            let limit = self.limits.max_message_size;
            self.in_flight.remove(&request_id);
            return Err(ChunkError::MessageTooLarge {
                size: new_size,
                limit,
            });
        }
        entry.body.put_slice(fragment);

        if is_final == IsFinal::Final {
            let done = self.in_flight.remove(&request_id).expect("entry present");
            Ok(Assembly::Complete(done.body.freeze()))
        } else {
            Ok(Assembly::Incomplete)
        }
    }

    /// Drop all in-flight state (channel closing).
    pub fn clear(&mut self) {
        self.in_flight.clear();
    }

    fn check_size(&self, size: usize) -> Result<(), ChunkError> {
        if self.limits.max_message_size != 0 && size > self.limits.max_message_size as usize {
            return Err(ChunkError::MessageTooLarge {
                size,
                limit: self.limits.max_message_size,
            });
        }
        Ok(())
    }
}

// ── Outbound splitting ────────────────────────────────────────────────────────

/// Split an outbound body into `C…CF` fragments of at most
/// `max_fragment` bytes each. A body that fits yields a single `F`.
pub fn split_chunks(body: &[u8], max_fragment: usize) -> Vec<(IsFinal, &[u8])> {
    assert!(max_fragment > 0, "fragment size must be positive");
    if body.len() <= max_fragment {
        return vec![(IsFinal::Final, body)];
    }
    let mut out = Vec::with_capacity(body.len() / max_fragment + 1);
    let mut rest = body;
    while rest.len() > max_fragment {
        let (head, tail) = rest.split_at(max_fragment);
        out.push((IsFinal::Intermediate, head));
        rest = tail;
    }
    out.push((IsFinal::Final, rest));
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> ChunkAssembler {
        ChunkAssembler::new(ChunkLimits {
            max_chunk_count: 4,
            max_message_size: 1024,
        })
    }

    #[test]
    fn single_final_chunk_completes() {
        let mut asm = assembler();
        match asm.push(IsFinal::Final, 1, b"payload").unwrap() {
            Assembly::Complete(body) => assert_eq!(&body[..], b"payload"),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn multi_chunk_reassembles_byte_identical() {
        let payload: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let mut asm = assembler();
        let parts = split_chunks(&payload, 128);
        assert_eq!(parts.len(), 3);

        let mut result = None;
        for (flag, fragment) in parts {
            match asm.push(flag, 7, fragment).unwrap() {
                Assembly::Complete(body) => result = Some(body),
                Assembly::Incomplete => {}
                Assembly::Aborted => panic!("unexpected abort"),
            }
        }
        assert_eq!(&result.expect("complete")[..], &payload[..]);
    }

    #[test]
    fn abort_discards_in_flight_state() {
        let mut asm = assembler();
        asm.push(IsFinal::Intermediate, 3, b"partial").unwrap();
        match asm.push(IsFinal::Aborted, 3, b"").unwrap() {
            Assembly::Aborted => {}
            other => panic!("expected Aborted, got {other:?}"),
        }
        assert_eq!(asm.aborted_count(), 1);

        // A fresh message on the same request id starts clean
        match asm.push(IsFinal::Final, 3, b"new").unwrap() {
            Assembly::Complete(body) => assert_eq!(&body[..], b"new"),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn interleaved_request_ids_do_not_mix() {
        let mut asm = assembler();
        asm.push(IsFinal::Intermediate, 1, b"aa").unwrap();
        asm.push(IsFinal::Intermediate, 2, b"bb").unwrap();
        let done1 = asm.push(IsFinal::Final, 1, b"AA").unwrap();
        let done2 = asm.push(IsFinal::Final, 2, b"BB").unwrap();
        match (done1, done2) {
            (Assembly::Complete(a), Assembly::Complete(b)) => {
                assert_eq!(&a[..], b"aaAA");
                assert_eq!(&b[..], b"bbBB");
            }
            other => panic!("expected two completions, got {other:?}"),
        }
    }

    #[test]
    fn chunk_count_limit_enforced() {
        let mut asm = assembler();
        for _ in 0..4 {
            asm.push(IsFinal::Intermediate, 9, b"x").unwrap();
        }
        let err = asm.push(IsFinal::Intermediate, 9, b"x").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_TCP_MESSAGE_TOO_LARGE);
    }

    #[test]
    fn message_size_limit_enforced() {
        let mut asm = ChunkAssembler::new(ChunkLimits {
            max_chunk_count: 0,
            max_message_size: 10,
        });
        asm.push(IsFinal::Intermediate, 1, b"123456").unwrap();
        let err = asm.push(IsFinal::Final, 1, b"7890ab").unwrap_err();
        assert!(matches!(err, ChunkError::MessageTooLarge { .. }));

        // Single oversize chunk also rejected
        let err = asm.push(IsFinal::Final, 2, &[0u8; 11]).unwrap_err();
        assert!(matches!(err, ChunkError::MessageTooLarge { .. }));
    }

    #[test]
    fn split_chunks_shapes() {
        assert_eq!(split_chunks(b"abc", 10), vec![(IsFinal::Final, &b"abc"[..])]);
        let parts = split_chunks(b"abcdef", 2);
        assert_eq!(
            parts,
            vec![
                (IsFinal::Intermediate, &b"ab"[..]),
                (IsFinal::Intermediate, &b"cd"[..]),
                (IsFinal::Final, &b"ef"[..]),
            ]
        );
    }
}
