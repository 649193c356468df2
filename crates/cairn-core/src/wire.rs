//! OPC UA TCP framing — the transport envelope around every message.
//!
//! These types ARE the protocol. Every frame starts with an 8-byte header:
//! a three-character message type, a one-byte final flag, and the total frame
//! size including the header itself, little-endian. OPN/CLO/MSG frames then
//! carry the secure channel id, a security header, and a sequence header.
//!
//! Fixed-size headers are #[repr(C, packed)] with zerocopy derives for
//! deterministic layout and allocation-free parsing. There is no unsafe code
//! in this module.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::codec::{BinaryDecodable, BinaryEncodable, DecodeError};
use crate::status::StatusCode;

/// OPC UA TCP protocol version negotiated in HEL/ACK.
pub const PROTOCOL_VERSION: u32 = 0;

/// Size of the fixed message header.
pub const MESSAGE_HEADER_SIZE: usize = 8;

/// Smallest receive/send buffer a peer may announce (Part 6).
pub const MIN_BUFFER_SIZE: u32 = 8192;

// ── Frame kind / final flag ───────────────────────────────────────────────────

/// The three-character frame discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Hello,
    Acknowledge,
    Error,
    ReverseHello,
    OpenSecureChannel,
    CloseSecureChannel,
    Message,
}

impl FrameKind {
    pub fn wire_bytes(self) -> [u8; 3] {
        match self {
            FrameKind::Hello => *b"HEL",
            FrameKind::Acknowledge => *b"ACK",
            FrameKind::Error => *b"ERR",
            FrameKind::ReverseHello => *b"RHE",
            FrameKind::OpenSecureChannel => *b"OPN",
            FrameKind::CloseSecureChannel => *b"CLO",
            FrameKind::Message => *b"MSG",
        }
    }

    pub fn from_wire(bytes: [u8; 3]) -> Option<Self> {
        Some(match &bytes {
            b"HEL" => FrameKind::Hello,
            b"ACK" => FrameKind::Acknowledge,
            b"ERR" => FrameKind::Error,
            b"RHE" => FrameKind::ReverseHello,
            b"OPN" => FrameKind::OpenSecureChannel,
            b"CLO" => FrameKind::CloseSecureChannel,
            b"MSG" => FrameKind::Message,
            _ => return None,
        })
    }

    /// Does this frame carry a secure channel id after the header?
    pub fn has_channel_id(self) -> bool {
        matches!(
            self,
            FrameKind::OpenSecureChannel | FrameKind::CloseSecureChannel | FrameKind::Message
        )
    }
}

/// Chunk final flag: `C` intermediate, `F` final, `A` abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsFinal {
    Intermediate,
    Final,
    Aborted,
}

impl IsFinal {
    pub fn wire_byte(self) -> u8 {
        match self {
            IsFinal::Intermediate => b'C',
            IsFinal::Final => b'F',
            IsFinal::Aborted => b'A',
        }
    }

    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            b'C' => Some(IsFinal::Intermediate),
            b'F' => Some(IsFinal::Final),
            b'A' => Some(IsFinal::Aborted),
            _ => None,
        }
    }
}

// ── Fixed headers ─────────────────────────────────────────────────────────────

/// The 8-byte header that precedes every frame.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct MessageHeader {
    pub message_type: [u8; 3],
    pub is_final: u8,
    /// Total frame size including this header.
    pub message_size: U32<LittleEndian>,
}

assert_eq_size!(MessageHeader, [u8; 8]);

/// Sequence header carried by every OPN/MSG chunk, inside the ciphered part.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct SequenceHeader {
    pub sequence_number: U32<LittleEndian>,
    pub request_id: U32<LittleEndian>,
}

assert_eq_size!(SequenceHeader, [u8; 8]);

/// ACK body: the HEL limits echoed back, without the endpoint URL.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct AcknowledgeBody {
    pub protocol_version: U32<LittleEndian>,
    pub receive_buffer_size: U32<LittleEndian>,
    pub send_buffer_size: U32<LittleEndian>,
    pub max_message_size: U32<LittleEndian>,
    pub max_chunk_count: U32<LittleEndian>,
}

assert_eq_size!(AcknowledgeBody, [u8; 20]);

// ── Variable-length bodies ────────────────────────────────────────────────────

/// HEL body.
#[derive(Debug, Clone, PartialEq)]
pub struct HelloBody {
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
    pub endpoint_url: Option<String>,
}

impl BinaryEncodable for HelloBody {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.protocol_version);
        buf.put_u32_le(self.receive_buffer_size);
        buf.put_u32_le(self.send_buffer_size);
        buf.put_u32_le(self.max_message_size);
        buf.put_u32_le(self.max_chunk_count);
        self.endpoint_url.encode(buf);
    }
}

impl BinaryDecodable for HelloBody {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(HelloBody {
            protocol_version: u32::decode(buf)?,
            receive_buffer_size: u32::decode(buf)?,
            send_buffer_size: u32::decode(buf)?,
            max_message_size: u32::decode(buf)?,
            max_chunk_count: u32::decode(buf)?,
            endpoint_url: Option::<String>::decode(buf)?,
        })
    }
}

/// ERR body: a status code and a human-readable reason.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorBody {
    pub error: StatusCode,
    pub reason: Option<String>,
}

impl BinaryEncodable for ErrorBody {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.error.0);
        self.reason.encode(buf);
    }
}

impl BinaryDecodable for ErrorBody {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(ErrorBody {
            error: StatusCode(u32::decode(buf)?),
            reason: Option::<String>::decode(buf)?,
        })
    }
}

/// RHE body: the server announces itself and the endpoint the client should
/// open on this already-established socket.
#[derive(Debug, Clone, PartialEq)]
pub struct ReverseHelloBody {
    pub server_uri: Option<String>,
    pub endpoint_url: Option<String>,
}

impl BinaryEncodable for ReverseHelloBody {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.server_uri.encode(buf);
        self.endpoint_url.encode(buf);
    }
}

impl BinaryDecodable for ReverseHelloBody {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(ReverseHelloBody {
            server_uri: Option::<String>::decode(buf)?,
            endpoint_url: Option::<String>::decode(buf)?,
        })
    }
}

/// Asymmetric security header, carried by OPN frames.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AsymmetricSecurityHeader {
    pub security_policy_uri: Option<String>,
    pub sender_certificate: Option<Vec<u8>>,
    pub receiver_certificate_thumbprint: Option<Vec<u8>>,
}

impl BinaryEncodable for AsymmetricSecurityHeader {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.security_policy_uri.encode(buf);
        self.sender_certificate.encode(buf);
        self.receiver_certificate_thumbprint.encode(buf);
    }
}

impl BinaryDecodable for AsymmetricSecurityHeader {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(AsymmetricSecurityHeader {
            security_policy_uri: Option::<String>::decode(buf)?,
            sender_certificate: Option::<Vec<u8>>::decode(buf)?,
            receiver_certificate_thumbprint: Option::<Vec<u8>>::decode(buf)?,
        })
    }
}

// ── Frame construction ────────────────────────────────────────────────────────

/// Assemble a complete frame from its body. The size field is filled in from
/// the final length.
pub fn build_frame(kind: FrameKind, is_final: IsFinal, body: &[u8]) -> Vec<u8> {
    let total = MESSAGE_HEADER_SIZE + body.len();
    let header = MessageHeader {
        message_type: kind.wire_bytes(),
        is_final: is_final.wire_byte(),
        message_size: (total as u32).into(),
    };
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(body);
    out
}

// ── Frame accumulation ────────────────────────────────────────────────────────

/// A complete frame as read off a socket: parsed header plus raw body.
///
/// `raw` is the entire frame including the 8-byte header — symmetric and
/// asymmetric signatures cover the header, so security processing needs it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub is_final: IsFinal,
    pub body: Bytes,
    pub raw: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("unknown message type {0:?}")]
    UnknownType([u8; 3]),

    #[error("unknown final flag 0x{0:02x}")]
    UnknownFinal(u8),

    #[error("declared size {size} below header size")]
    SizeTooSmall { size: u32 },

    #[error("declared size {size} exceeds receive buffer {max}")]
    TooLarge { size: u32, max: u32 },
}

impl FrameError {
    pub fn status(&self) -> StatusCode {
        match self {
            FrameError::TooLarge { .. } => StatusCode::BAD_TCP_MESSAGE_TOO_LARGE,
            _ => StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID,
        }
    }
}

/// Incremental frame reader over a TCP byte stream.
///
/// Bytes are fed in as they arrive; complete frames come out. The declared
/// size is validated against `max_frame_size` before any body byte is
/// buffered, so an oversize announcement fails before any body parsing.
pub struct FrameAccumulator {
    buffer: BytesMut,
    max_frame_size: u32,
}

impl FrameAccumulator {
    pub fn new(max_frame_size: u32) -> Self {
        FrameAccumulator {
            buffer: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Raise the limit after HEL/ACK negotiation.
    pub fn set_max_frame_size(&mut self, max: u32) {
        self.max_frame_size = max;
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extract the next complete frame, if one is buffered.
    ///
    /// A `FrameError` is fatal for the connection; the caller closes the
    /// socket (after an ERR frame where the role allows one).
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buffer.len() < MESSAGE_HEADER_SIZE {
            return Ok(None);
        }
        let header = MessageHeader::read_from_prefix(&self.buffer[..]).expect("length checked");
        let kind = FrameKind::from_wire(header.message_type)
            .ok_or(FrameError::UnknownType(header.message_type))?;
        let is_final =
            IsFinal::from_wire(header.is_final).ok_or(FrameError::UnknownFinal(header.is_final))?;
        // HEL/ACK/ERR/RHE are always single frames
        if !matches!(kind, FrameKind::Message | FrameKind::OpenSecureChannel)
            && is_final != IsFinal::Final
        {
            return Err(FrameError::UnknownFinal(header.is_final));
        }
        let size = header.message_size.get();
        if (size as usize) < MESSAGE_HEADER_SIZE {
            return Err(FrameError::SizeTooSmall { size });
        }
        if size > self.max_frame_size {
            return Err(FrameError::TooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        if self.buffer.len() < size as usize {
            return Ok(None);
        }
        let raw = self.buffer.split_to(size as usize).freeze();
        Ok(Some(Frame {
            kind,
            is_final,
            body: raw.slice(MESSAGE_HEADER_SIZE..),
            raw,
        }))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
