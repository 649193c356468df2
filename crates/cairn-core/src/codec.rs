//! OPC UA binary encoding.
//!
//! Little-endian primitives, length-prefixed strings and arrays with `-1`
//! meaning null, and the composite built-in types from [`crate::types`]. The
//! codec is stateless: every function takes the buffer it reads or writes.
//!
//! Decoding never trusts a length prefix: a declared length larger than the
//! bytes actually remaining is an immediate error, so a hostile peer cannot
//! make the decoder allocate unbounded memory.

use bytes::{Buf, BufMut};

use crate::status::StatusCode;
use crate::types::{
    DataValue, ExpandedNodeId, ExtensionObject, Guid, Identifier, LocalizedText, NodeId,
    QualifiedName, Variant, VariantType,
};

/// Upper bound on decoded array lengths, independent of message size limits.
pub const MAX_ARRAY_LENGTH: usize = 65_536;

/// Upper bound on nested variant/diagnostic recursion while decoding.
const MAX_DECODE_DEPTH: u32 = 16;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("buffer exhausted")]
    UnexpectedEof,

    #[error("invalid length prefix: {0}")]
    InvalidLength(i64),

    #[error("array length {0} exceeds limit {MAX_ARRAY_LENGTH}")]
    ArrayTooLong(usize),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown node id encoding byte: 0x{0:02x}")]
    UnknownNodeIdEncoding(u8),

    #[error("unknown variant type byte: 0x{0:02x}")]
    UnknownVariantType(u8),

    #[error("unknown extension object encoding byte: 0x{0:02x}")]
    UnknownExtensionEncoding(u8),

    #[error("nesting deeper than {MAX_DECODE_DEPTH} levels")]
    TooDeep,
}

impl DecodeError {
    /// The wire status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            DecodeError::ArrayTooLong(_) | DecodeError::TooDeep => {
                StatusCode::BAD_ENCODING_LIMITS_EXCEEDED
            }
            _ => StatusCode::BAD_DECODING_ERROR,
        }
    }
}

// ── Traits ────────────────────────────────────────────────────────────────────

pub trait BinaryEncodable {
    fn encode<B: BufMut>(&self, buf: &mut B);
}

pub trait BinaryDecodable: Sized {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError>;
}

/// Encode a value into a fresh vec. Convenience for callers that need the
/// byte length before framing.
pub fn encode_to_vec<T: BinaryEncodable>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.encode(&mut out);
    out
}

// ── Guarded primitive reads ───────────────────────────────────────────────────

fn need<B: Buf>(buf: &B, n: usize) -> Result<(), DecodeError> {
    if buf.remaining() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok(())
}

macro_rules! primitive_codec {
    ($ty:ty, $put:ident, $get:ident, $size:expr) => {
        impl BinaryEncodable for $ty {
            fn encode<B: BufMut>(&self, buf: &mut B) {
                buf.$put(*self);
            }
        }
        impl BinaryDecodable for $ty {
            fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
                need(buf, $size)?;
                Ok(buf.$get())
            }
        }
    };
}

primitive_codec!(i8, put_i8, get_i8, 1);
primitive_codec!(u8, put_u8, get_u8, 1);
primitive_codec!(i16, put_i16_le, get_i16_le, 2);
primitive_codec!(u16, put_u16_le, get_u16_le, 2);
primitive_codec!(i32, put_i32_le, get_i32_le, 4);
primitive_codec!(u32, put_u32_le, get_u32_le, 4);
primitive_codec!(i64, put_i64_le, get_i64_le, 8);
primitive_codec!(u64, put_u64_le, get_u64_le, 8);
primitive_codec!(f32, put_f32_le, get_f32_le, 4);
primitive_codec!(f64, put_f64_le, get_f64_le, 8);

impl BinaryEncodable for bool {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(u8::from(*self));
    }
}

impl BinaryDecodable for bool {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        need(buf, 1)?;
        Ok(buf.get_u8() != 0)
    }
}

impl BinaryEncodable for StatusCode {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.0);
    }
}

impl BinaryDecodable for StatusCode {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(StatusCode(u32::decode(buf)?))
    }
}

// ── Length-prefixed byte runs ─────────────────────────────────────────────────

/// Read a `-1`-or-length prefix, validated against the remaining bytes.
fn decode_len<B: Buf>(buf: &mut B) -> Result<Option<usize>, DecodeError> {
    let raw = i32::decode(buf)?;
    if raw == -1 {
        return Ok(None);
    }
    if raw < 0 {
        return Err(DecodeError::InvalidLength(raw as i64));
    }
    let len = raw as usize;
    need(buf, len)?;
    Ok(Some(len))
}

fn decode_raw_bytes<B: Buf>(buf: &mut B) -> Result<Option<Vec<u8>>, DecodeError> {
    match decode_len(buf)? {
        None => Ok(None),
        Some(len) => {
            let mut out = vec![0u8; len];
            buf.copy_to_slice(&mut out);
            Ok(Some(out))
        }
    }
}

/// UA String: `None` encodes as length `-1`.
impl BinaryEncodable for Option<String> {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            None => buf.put_i32_le(-1),
            Some(s) => {
                buf.put_i32_le(s.len() as i32);
                buf.put_slice(s.as_bytes());
            }
        }
    }
}

impl BinaryDecodable for Option<String> {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        match decode_raw_bytes(buf)? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| DecodeError::InvalidUtf8),
        }
    }
}

/// UA ByteString: `None` encodes as length `-1`.
impl BinaryEncodable for Option<Vec<u8>> {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            None => buf.put_i32_le(-1),
            Some(bytes) => {
                buf.put_i32_le(bytes.len() as i32);
                buf.put_slice(bytes);
            }
        }
    }
}

impl BinaryDecodable for Option<Vec<u8>> {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        decode_raw_bytes(buf)
    }
}

// ── Arrays ────────────────────────────────────────────────────────────────────

/// Encode an array with the `-1` null convention.
pub fn encode_array<T: BinaryEncodable, B: BufMut>(array: &Option<Vec<T>>, buf: &mut B) {
    match array {
        None => buf.put_i32_le(-1),
        Some(items) => {
            buf.put_i32_le(items.len() as i32);
            for item in items {
                item.encode(buf);
            }
        }
    }
}

/// Decode an array with the `-1` null convention, bounded by
/// [`MAX_ARRAY_LENGTH`] and by the bytes actually present.
pub fn decode_array<T: BinaryDecodable, B: Buf>(
    buf: &mut B,
) -> Result<Option<Vec<T>>, DecodeError> {
    let raw = i32::decode(buf)?;
    if raw == -1 {
        return Ok(None);
    }
    if raw < 0 {
        return Err(DecodeError::InvalidLength(raw as i64));
    }
    let len = raw as usize;
    if len > MAX_ARRAY_LENGTH {
        return Err(DecodeError::ArrayTooLong(len));
    }
    // Each element takes at least one byte; cheap sanity before allocating.
    need(buf, len)?;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(T::decode(buf)?);
    }
    Ok(Some(out))
}

// ── Guid ──────────────────────────────────────────────────────────────────────

impl BinaryEncodable for Guid {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&self.0);
    }
}

impl BinaryDecodable for Guid {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        need(buf, 16)?;
        let mut bytes = [0u8; 16];
        buf.copy_to_slice(&mut bytes);
        Ok(Guid(bytes))
    }
}

// ── NodeId ────────────────────────────────────────────────────────────────────

const NODEID_TWO_BYTE: u8 = 0x00;
const NODEID_FOUR_BYTE: u8 = 0x01;
const NODEID_NUMERIC: u8 = 0x02;
const NODEID_STRING: u8 = 0x03;
const NODEID_GUID: u8 = 0x04;
const NODEID_OPAQUE: u8 = 0x05;

impl BinaryEncodable for NodeId {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        match &self.identifier {
            Identifier::Numeric(v) if self.namespace == 0 && *v <= 0xFF => {
                buf.put_u8(NODEID_TWO_BYTE);
                buf.put_u8(*v as u8);
            }
            Identifier::Numeric(v) if self.namespace <= 0xFF && *v <= 0xFFFF => {
                buf.put_u8(NODEID_FOUR_BYTE);
                buf.put_u8(self.namespace as u8);
                buf.put_u16_le(*v as u16);
            }
            Identifier::Numeric(v) => {
                buf.put_u8(NODEID_NUMERIC);
                buf.put_u16_le(self.namespace);
                buf.put_u32_le(*v);
            }
            Identifier::String(s) => {
                buf.put_u8(NODEID_STRING);
                buf.put_u16_le(self.namespace);
                Some(s.clone()).encode(buf);
            }
            Identifier::Guid(g) => {
                buf.put_u8(NODEID_GUID);
                buf.put_u16_le(self.namespace);
                g.encode(buf);
            }
            Identifier::Opaque(bytes) => {
                buf.put_u8(NODEID_OPAQUE);
                buf.put_u16_le(self.namespace);
                Some(bytes.clone()).encode(buf);
            }
        }
    }
}

impl BinaryDecodable for NodeId {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        let encoding = u8::decode(buf)?;
        // High bits are ExpandedNodeId flags, invalid in a plain NodeId.
        match encoding & 0x3F {
            NODEID_TWO_BYTE => Ok(NodeId::numeric(0, u8::decode(buf)? as u32)),
            NODEID_FOUR_BYTE => {
                let ns = u8::decode(buf)? as u16;
                let id = u16::decode(buf)? as u32;
                Ok(NodeId::numeric(ns, id))
            }
            NODEID_NUMERIC => {
                let ns = u16::decode(buf)?;
                let id = u32::decode(buf)?;
                Ok(NodeId::numeric(ns, id))
            }
            NODEID_STRING => {
                let ns = u16::decode(buf)?;
                let s = Option::<String>::decode(buf)?.unwrap_or_default();
                Ok(NodeId::string(ns, s))
            }
            NODEID_GUID => {
                let ns = u16::decode(buf)?;
                let g = Guid::decode(buf)?;
                Ok(NodeId {
                    namespace: ns,
                    identifier: Identifier::Guid(g),
                })
            }
            NODEID_OPAQUE => {
                let ns = u16::decode(buf)?;
                let bytes = Option::<Vec<u8>>::decode(buf)?.unwrap_or_default();
                Ok(NodeId::opaque(ns, bytes))
            }
            other => Err(DecodeError::UnknownNodeIdEncoding(other)),
        }
    }
}

const EXPANDED_NS_URI_FLAG: u8 = 0x80;
const EXPANDED_SERVER_INDEX_FLAG: u8 = 0x40;

impl BinaryEncodable for ExpandedNodeId {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        let mut inner = Vec::new();
        self.node_id.encode(&mut inner);
        let mut flags = inner[0];
        if self.namespace_uri.is_some() {
            flags |= EXPANDED_NS_URI_FLAG;
        }
        if self.server_index != 0 {
            flags |= EXPANDED_SERVER_INDEX_FLAG;
        }
        buf.put_u8(flags);
        buf.put_slice(&inner[1..]);
        if self.namespace_uri.is_some() {
            self.namespace_uri.encode(buf);
        }
        if self.server_index != 0 {
            buf.put_u32_le(self.server_index);
        }
    }
}

impl BinaryDecodable for ExpandedNodeId {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        need(buf, 1)?;
        let first = buf.chunk()[0];
        let node_id = NodeId::decode(buf)?;
        let namespace_uri = if first & EXPANDED_NS_URI_FLAG != 0 {
            Option::<String>::decode(buf)?
        } else {
            None
        };
        let server_index = if first & EXPANDED_SERVER_INDEX_FLAG != 0 {
            u32::decode(buf)?
        } else {
            0
        };
        Ok(ExpandedNodeId {
            node_id,
            namespace_uri,
            server_index,
        })
    }
}

// ── QualifiedName / LocalizedText ─────────────────────────────────────────────

impl BinaryEncodable for QualifiedName {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.namespace);
        self.name.encode(buf);
    }
}

impl BinaryDecodable for QualifiedName {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        Ok(QualifiedName {
            namespace: u16::decode(buf)?,
            name: Option::<String>::decode(buf)?,
        })
    }
}

const TEXT_LOCALE_FLAG: u8 = 0x01;
const TEXT_TEXT_FLAG: u8 = 0x02;

impl BinaryEncodable for LocalizedText {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        let mut mask = 0u8;
        if self.locale.is_some() {
            mask |= TEXT_LOCALE_FLAG;
        }
        if self.text.is_some() {
            mask |= TEXT_TEXT_FLAG;
        }
        buf.put_u8(mask);
        if self.locale.is_some() {
            self.locale.encode(buf);
        }
        if self.text.is_some() {
            self.text.encode(buf);
        }
    }
}

impl BinaryDecodable for LocalizedText {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        let mask = u8::decode(buf)?;
        let locale = if mask & TEXT_LOCALE_FLAG != 0 {
            Option::<String>::decode(buf)?
        } else {
            None
        };
        let text = if mask & TEXT_TEXT_FLAG != 0 {
            Option::<String>::decode(buf)?
        } else {
            None
        };
        Ok(LocalizedText { locale, text })
    }
}

// ── ExtensionObject ───────────────────────────────────────────────────────────

impl BinaryEncodable for ExtensionObject {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.type_id.encode(buf);
        match &self.body {
            None => buf.put_u8(0x00),
            Some(body) => {
                buf.put_u8(0x01);
                buf.put_i32_le(body.len() as i32);
                buf.put_slice(body);
            }
        }
    }
}

impl BinaryDecodable for ExtensionObject {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        let type_id = NodeId::decode(buf)?;
        let encoding = u8::decode(buf)?;
        let body = match encoding {
            0x00 => None,
            // 0x01 binary body; 0x02 (XML) is carried opaquely the same way
            0x01 | 0x02 => decode_raw_bytes(buf)?,
            other => return Err(DecodeError::UnknownExtensionEncoding(other)),
        };
        Ok(ExtensionObject { type_id, body })
    }
}

// ── DiagnosticInfo ────────────────────────────────────────────────────────────

/// The toolkit never produces diagnostics; inbound ones are parsed and
/// dropped so the stream stays aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiagnosticInfo;

impl BinaryEncodable for DiagnosticInfo {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(0x00);
    }
}

impl BinaryDecodable for DiagnosticInfo {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        decode_diagnostic_info(buf, 0)
    }
}

fn decode_diagnostic_info<B: Buf>(buf: &mut B, depth: u32) -> Result<DiagnosticInfo, DecodeError> {
    if depth > MAX_DECODE_DEPTH {
        return Err(DecodeError::TooDeep);
    }
    let mask = u8::decode(buf)?;
    // SymbolicId, NamespaceUri, LocalizedText, Locale — all Int32 table refs
    for flag in [0x01u8, 0x02, 0x04, 0x08] {
        if mask & flag != 0 {
            i32::decode(buf)?;
        }
    }
    if mask & 0x10 != 0 {
        Option::<String>::decode(buf)?;
    }
    if mask & 0x20 != 0 {
        u32::decode(buf)?;
    }
    if mask & 0x40 != 0 {
        decode_diagnostic_info(buf, depth + 1)?;
    }
    Ok(DiagnosticInfo)
}

// ── Variant ───────────────────────────────────────────────────────────────────

const VARIANT_ARRAY_FLAG: u8 = 0x80;
const VARIANT_DIMENSIONS_FLAG: u8 = 0x40;

fn encode_scalar<B: BufMut>(value: &Variant, buf: &mut B) {
    match value {
        Variant::Empty | Variant::Array { .. } => unreachable!("checked by caller"),
        Variant::Boolean(v) => v.encode(buf),
        Variant::SByte(v) => v.encode(buf),
        Variant::Byte(v) => v.encode(buf),
        Variant::Int16(v) => v.encode(buf),
        Variant::UInt16(v) => v.encode(buf),
        Variant::Int32(v) => v.encode(buf),
        Variant::UInt32(v) => v.encode(buf),
        Variant::Int64(v) => v.encode(buf),
        Variant::UInt64(v) => v.encode(buf),
        Variant::Float(v) => v.encode(buf),
        Variant::Double(v) => v.encode(buf),
        Variant::String(v) => v.encode(buf),
        Variant::DateTime(v) => v.encode(buf),
        Variant::Guid(v) => v.encode(buf),
        Variant::ByteString(v) => v.encode(buf),
        Variant::StatusCode(v) => v.encode(buf),
        Variant::NodeId(v) => v.encode(buf),
        Variant::QualifiedName(v) => v.encode(buf),
        Variant::LocalizedText(v) => v.encode(buf),
        Variant::ExtensionObject(v) => v.encode(buf),
    }
}

fn decode_scalar<B: Buf>(
    ty: VariantType,
    buf: &mut B,
    depth: u32,
) -> Result<Variant, DecodeError> {
    if depth > MAX_DECODE_DEPTH {
        return Err(DecodeError::TooDeep);
    }
    Ok(match ty {
        VariantType::Boolean => Variant::Boolean(bool::decode(buf)?),
        VariantType::SByte => Variant::SByte(i8::decode(buf)?),
        VariantType::Byte => Variant::Byte(u8::decode(buf)?),
        VariantType::Int16 => Variant::Int16(i16::decode(buf)?),
        VariantType::UInt16 => Variant::UInt16(u16::decode(buf)?),
        VariantType::Int32 => Variant::Int32(i32::decode(buf)?),
        VariantType::UInt32 => Variant::UInt32(u32::decode(buf)?),
        VariantType::Int64 => Variant::Int64(i64::decode(buf)?),
        VariantType::UInt64 => Variant::UInt64(u64::decode(buf)?),
        VariantType::Float => Variant::Float(f32::decode(buf)?),
        VariantType::Double => Variant::Double(f64::decode(buf)?),
        VariantType::String => Variant::String(Option::<String>::decode(buf)?),
        VariantType::DateTime => Variant::DateTime(i64::decode(buf)?),
        VariantType::Guid => Variant::Guid(Guid::decode(buf)?),
        VariantType::ByteString | VariantType::XmlElement => {
            Variant::ByteString(Option::<Vec<u8>>::decode(buf)?)
        }
        VariantType::StatusCode => Variant::StatusCode(StatusCode::decode(buf)?),
        VariantType::NodeId => Variant::NodeId(NodeId::decode(buf)?),
        VariantType::ExpandedNodeId => {
            // Carried as its inner NodeId; URI/server index are dropped
            Variant::NodeId(ExpandedNodeId::decode(buf)?.node_id)
        }
        VariantType::QualifiedName => Variant::QualifiedName(QualifiedName::decode(buf)?),
        VariantType::LocalizedText => Variant::LocalizedText(LocalizedText::decode(buf)?),
        VariantType::ExtensionObject => Variant::ExtensionObject(ExtensionObject::decode(buf)?),
        VariantType::DataValue | VariantType::Variant | VariantType::DiagnosticInfo => {
            return Err(DecodeError::UnknownVariantType(ty as u8))
        }
    })
}

impl BinaryEncodable for Variant {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Variant::Empty => buf.put_u8(0),
            Variant::Array {
                element_type,
                values,
                dimensions,
            } => {
                let mut byte = *element_type as u8 | VARIANT_ARRAY_FLAG;
                if dimensions.is_some() {
                    byte |= VARIANT_DIMENSIONS_FLAG;
                }
                buf.put_u8(byte);
                buf.put_i32_le(values.len() as i32);
                for v in values {
                    encode_scalar(v, buf);
                }
                if let Some(dims) = dimensions {
                    buf.put_i32_le(dims.len() as i32);
                    for d in dims {
                        buf.put_i32_le(*d as i32);
                    }
                }
            }
            scalar => {
                // type_id is Some for every non-Empty variant
                buf.put_u8(scalar.type_id().expect("scalar type") as u8);
                encode_scalar(scalar, buf);
            }
        }
    }
}

impl BinaryDecodable for Variant {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        let byte = u8::decode(buf)?;
        if byte == 0 {
            return Ok(Variant::Empty);
        }
        let ty = VariantType::from_u8(byte & 0x3F)
            .ok_or(DecodeError::UnknownVariantType(byte & 0x3F))?;
        if byte & VARIANT_ARRAY_FLAG == 0 {
            return decode_scalar(ty, buf, 0);
        }
        let raw_len = i32::decode(buf)?;
        if raw_len < -1 {
            return Err(DecodeError::InvalidLength(raw_len as i64));
        }
        let len = raw_len.max(0) as usize;
        if len > MAX_ARRAY_LENGTH {
            return Err(DecodeError::ArrayTooLong(len));
        }
        need(buf, len)?;
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            values.push(decode_scalar(ty, buf, 0)?);
        }
        let dimensions = if byte & VARIANT_DIMENSIONS_FLAG != 0 {
            decode_array::<i32, _>(buf)?.map(|dims| dims.into_iter().map(|d| d as u32).collect())
        } else {
            None
        };
        Ok(Variant::Array {
            element_type: ty,
            values,
            dimensions,
        })
    }
}

// ── DataValue ─────────────────────────────────────────────────────────────────

const DV_VALUE_FLAG: u8 = 0x01;
const DV_STATUS_FLAG: u8 = 0x02;
const DV_SOURCE_TS_FLAG: u8 = 0x04;
const DV_SERVER_TS_FLAG: u8 = 0x08;

impl BinaryEncodable for DataValue {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        let mut mask = 0u8;
        if self.value.is_some() {
            mask |= DV_VALUE_FLAG;
        }
        if self.status != StatusCode::GOOD {
            mask |= DV_STATUS_FLAG;
        }
        if self.source_timestamp.is_some() {
            mask |= DV_SOURCE_TS_FLAG;
        }
        if self.server_timestamp.is_some() {
            mask |= DV_SERVER_TS_FLAG;
        }
        buf.put_u8(mask);
        if let Some(value) = &self.value {
            value.encode(buf);
        }
        if mask & DV_STATUS_FLAG != 0 {
            self.status.encode(buf);
        }
        if let Some(ts) = self.source_timestamp {
            buf.put_i64_le(ts);
        }
        if let Some(ts) = self.server_timestamp {
            buf.put_i64_le(ts);
        }
    }
}

impl BinaryDecodable for DataValue {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        let mask = u8::decode(buf)?;
        let value = if mask & DV_VALUE_FLAG != 0 {
            Some(Variant::decode(buf)?)
        } else {
            None
        };
        let status = if mask & DV_STATUS_FLAG != 0 {
            StatusCode::decode(buf)?
        } else {
            StatusCode::GOOD
        };
        let source_timestamp = if mask & DV_SOURCE_TS_FLAG != 0 {
            Some(i64::decode(buf)?)
        } else {
            None
        };
        if mask & 0x10 != 0 {
            u16::decode(buf)?; // source picoseconds, dropped
        }
        let server_timestamp = if mask & DV_SERVER_TS_FLAG != 0 {
            Some(i64::decode(buf)?)
        } else {
            None
        };
        if mask & 0x20 != 0 {
            u16::decode(buf)?; // server picoseconds, dropped
        }
        Ok(DataValue {
            value,
            status,
            source_timestamp,
            server_timestamp,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
