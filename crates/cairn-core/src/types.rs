//! OPC UA built-in types.
//!
//! These are the value types that cross the wire: identifiers, qualified
//! names, variants and data values. Encoding lives in [`crate::codec`]; this
//! module is pure data plus the conversions the service layer needs.

use std::fmt;
use std::str::FromStr;

use crate::status::StatusCode;

/// 100-nanosecond intervals since 1601-01-01 (UTC), the OPC UA DateTime.
pub type DateTimeTicks = i64;

/// Ticks between 1601-01-01 and 1970-01-01.
pub const UNIX_EPOCH_TICKS: i64 = 116_444_736_000_000_000;

/// Convert a unix timestamp in milliseconds to DateTime ticks.
pub fn ticks_from_unix_millis(millis: i64) -> DateTimeTicks {
    UNIX_EPOCH_TICKS + millis * 10_000
}

// ── Guid ──────────────────────────────────────────────────────────────────────

/// A 16-byte GUID, stored in its wire layout (data1..3 little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid(pub [u8; 16]);

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{}",
            b[3], b[2], b[1], b[0], b[5], b[4], b[7], b[6], b[8], b[9],
            hex::encode(&b[10..16])
        )
    }
}

// ── NodeId ────────────────────────────────────────────────────────────────────

/// The identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u32),
    String(String),
    Guid(Guid),
    Opaque(Vec<u8>),
}

/// A node identifier: namespace index plus identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: Identifier,
}

impl NodeId {
    pub const fn numeric(namespace: u16, value: u32) -> Self {
        NodeId {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        NodeId {
            namespace,
            identifier: Identifier::String(value.into()),
        }
    }

    pub fn opaque(namespace: u16, value: Vec<u8>) -> Self {
        NodeId {
            namespace,
            identifier: Identifier::Opaque(value),
        }
    }

    /// The null node id: ns=0, numeric 0.
    pub const fn null() -> Self {
        NodeId::numeric(0, 0)
    }

    pub fn is_null(&self) -> bool {
        self.namespace == 0 && matches!(self.identifier, Identifier::Numeric(0))
    }

    /// Numeric value if this is a ns=0 numeric id — the form used to key
    /// standard nodes and message encodings.
    pub fn as_ns0_numeric(&self) -> Option<u32> {
        match (self.namespace, &self.identifier) {
            (0, Identifier::Numeric(v)) => Some(*v),
            _ => None,
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};", self.namespace)?;
        }
        match &self.identifier {
            Identifier::Numeric(v) => write!(f, "i={v}"),
            Identifier::String(s) => write!(f, "s={s}"),
            Identifier::Guid(g) => write!(f, "g={g}"),
            Identifier::Opaque(b) => write!(f, "b={}", hex::encode(b)),
        }
    }
}

/// Parse the `ns=<n>;i=<v>` / `s=<str>` textual form.
impl FromStr for NodeId {
    type Err = StatusCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, rest) = match s.strip_prefix("ns=") {
            Some(tail) => {
                let (ns, rest) = tail
                    .split_once(';')
                    .ok_or(StatusCode::BAD_NODE_ID_INVALID)?;
                let ns = ns.parse().map_err(|_| StatusCode::BAD_NODE_ID_INVALID)?;
                (ns, rest)
            }
            None => (0, s),
        };
        if let Some(v) = rest.strip_prefix("i=") {
            let v = v.parse().map_err(|_| StatusCode::BAD_NODE_ID_INVALID)?;
            Ok(NodeId::numeric(namespace, v))
        } else if let Some(v) = rest.strip_prefix("s=") {
            Ok(NodeId::string(namespace, v))
        } else if let Some(v) = rest.strip_prefix("b=") {
            let bytes = hex::decode(v).map_err(|_| StatusCode::BAD_NODE_ID_INVALID)?;
            Ok(NodeId::opaque(namespace, bytes))
        } else {
            Err(StatusCode::BAD_NODE_ID_INVALID)
        }
    }
}

/// A node id qualified by an optional namespace URI and server index, as it
/// appears in browse results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExpandedNodeId {
    pub node_id: NodeId,
    pub namespace_uri: Option<String>,
    pub server_index: u32,
}

impl From<NodeId> for ExpandedNodeId {
    fn from(node_id: NodeId) -> Self {
        ExpandedNodeId {
            node_id,
            namespace_uri: None,
            server_index: 0,
        }
    }
}

// ── Names and text ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QualifiedName {
    pub namespace: u16,
    pub name: Option<String>,
}

impl QualifiedName {
    pub fn new(namespace: u16, name: impl Into<String>) -> Self {
        QualifiedName {
            namespace,
            name: Some(name.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalizedText {
    pub locale: Option<String>,
    pub text: Option<String>,
}

impl LocalizedText {
    pub fn new(text: impl Into<String>) -> Self {
        LocalizedText {
            locale: None,
            text: Some(text.into()),
        }
    }
}

// ── ExtensionObject ───────────────────────────────────────────────────────────

/// An extension object: a type id plus an opaque binary body.
///
/// The toolkit decodes known bodies (identity tokens, notification data) at
/// the message layer; everything else is carried as raw bytes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtensionObject {
    pub type_id: NodeId,
    /// Binary body, `None` when the object carries no body.
    pub body: Option<Vec<u8>>,
}

impl ExtensionObject {
    pub fn null() -> Self {
        ExtensionObject::default()
    }

    pub fn new(type_id: NodeId, body: Vec<u8>) -> Self {
        ExtensionObject {
            type_id,
            body: Some(body),
        }
    }
}

// ── Variant ───────────────────────────────────────────────────────────────────

/// Built-in type tag, the low six bits of the Variant encoding byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VariantType {
    Boolean = 1,
    SByte = 2,
    Byte = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,
    Float = 10,
    Double = 11,
    String = 12,
    DateTime = 13,
    Guid = 14,
    ByteString = 15,
    XmlElement = 16,
    NodeId = 17,
    ExpandedNodeId = 18,
    StatusCode = 19,
    QualifiedName = 20,
    LocalizedText = 21,
    ExtensionObject = 22,
    DataValue = 23,
    Variant = 24,
    DiagnosticInfo = 25,
}

impl VariantType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Boolean),
            2 => Some(Self::SByte),
            3 => Some(Self::Byte),
            4 => Some(Self::Int16),
            5 => Some(Self::UInt16),
            6 => Some(Self::Int32),
            7 => Some(Self::UInt32),
            8 => Some(Self::Int64),
            9 => Some(Self::UInt64),
            10 => Some(Self::Float),
            11 => Some(Self::Double),
            12 => Some(Self::String),
            13 => Some(Self::DateTime),
            14 => Some(Self::Guid),
            15 => Some(Self::ByteString),
            16 => Some(Self::XmlElement),
            17 => Some(Self::NodeId),
            18 => Some(Self::ExpandedNodeId),
            19 => Some(Self::StatusCode),
            20 => Some(Self::QualifiedName),
            21 => Some(Self::LocalizedText),
            22 => Some(Self::ExtensionObject),
            _ => None,
        }
    }

    /// The ns=0 data-type node id for this built-in type.
    pub fn data_type_id(self) -> NodeId {
        NodeId::numeric(0, self as u32)
    }
}

/// A dynamically typed OPC UA value.
///
/// Arrays are homogeneous and carry their element type explicitly so that an
/// empty array still knows what it holds. Multi-dimensional arrays carry
/// their dimensions; the flat `values` vec is in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    /// The absent value (encoding byte 0).
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(Option<String>),
    DateTime(DateTimeTicks),
    Guid(Guid),
    ByteString(Option<Vec<u8>>),
    StatusCode(StatusCode),
    NodeId(NodeId),
    QualifiedName(QualifiedName),
    LocalizedText(LocalizedText),
    ExtensionObject(ExtensionObject),
    Array {
        element_type: VariantType,
        values: Vec<Variant>,
        dimensions: Option<Vec<u32>>,
    },
}

impl Default for Variant {
    fn default() -> Self {
        Variant::Empty
    }
}

impl Variant {
    /// The scalar type tag, or the element type for arrays.
    pub fn type_id(&self) -> Option<VariantType> {
        Some(match self {
            Variant::Empty => return None,
            Variant::Boolean(_) => VariantType::Boolean,
            Variant::SByte(_) => VariantType::SByte,
            Variant::Byte(_) => VariantType::Byte,
            Variant::Int16(_) => VariantType::Int16,
            Variant::UInt16(_) => VariantType::UInt16,
            Variant::Int32(_) => VariantType::Int32,
            Variant::UInt32(_) => VariantType::UInt32,
            Variant::Int64(_) => VariantType::Int64,
            Variant::UInt64(_) => VariantType::UInt64,
            Variant::Float(_) => VariantType::Float,
            Variant::Double(_) => VariantType::Double,
            Variant::String(_) => VariantType::String,
            Variant::DateTime(_) => VariantType::DateTime,
            Variant::Guid(_) => VariantType::Guid,
            Variant::ByteString(_) => VariantType::ByteString,
            Variant::StatusCode(_) => VariantType::StatusCode,
            Variant::NodeId(_) => VariantType::NodeId,
            Variant::QualifiedName(_) => VariantType::QualifiedName,
            Variant::LocalizedText(_) => VariantType::LocalizedText,
            Variant::ExtensionObject(_) => VariantType::ExtensionObject,
            Variant::Array { element_type, .. } => *element_type,
        })
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Variant::Array { .. })
    }

    /// Value rank of this value: `-1` scalar, `1` one-dimensional,
    /// `n` for n-dimensional arrays.
    pub fn value_rank(&self) -> i32 {
        match self {
            Variant::Array {
                dimensions: Some(dims),
                ..
            } => dims.len() as i32,
            Variant::Array { .. } => 1,
            _ => -1,
        }
    }
}

// ── DataValue ─────────────────────────────────────────────────────────────────

/// A value with its quality and timestamps.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    pub value: Option<Variant>,
    pub status: StatusCode,
    pub source_timestamp: Option<DateTimeTicks>,
    pub server_timestamp: Option<DateTimeTicks>,
}

impl DataValue {
    pub fn new(value: Variant) -> Self {
        DataValue {
            value: Some(value),
            status: StatusCode::GOOD,
            source_timestamp: None,
            server_timestamp: None,
        }
    }

    pub fn status_only(status: StatusCode) -> Self {
        DataValue {
            value: None,
            status,
            source_timestamp: None,
            server_timestamp: None,
        }
    }
}

// ── Attributes ────────────────────────────────────────────────────────────────

/// OPC UA attribute ids (Part 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AttributeId {
    NodeId = 1,
    NodeClass = 2,
    BrowseName = 3,
    DisplayName = 4,
    Description = 5,
    WriteMask = 6,
    UserWriteMask = 7,
    IsAbstract = 8,
    Symmetric = 9,
    InverseName = 10,
    ContainsNoLoops = 11,
    EventNotifier = 12,
    Value = 13,
    DataType = 14,
    ValueRank = 15,
    ArrayDimensions = 16,
    AccessLevel = 17,
    UserAccessLevel = 18,
    MinimumSamplingInterval = 19,
    Historizing = 20,
    Executable = 21,
    UserExecutable = 22,
    DataTypeDefinition = 23,
    RolePermissions = 24,
    UserRolePermissions = 25,
    AccessRestrictions = 26,
}

impl AttributeId {
    pub fn from_u32(value: u32) -> Option<Self> {
        use AttributeId::*;
        Some(match value {
            1 => NodeId,
            2 => NodeClass,
            3 => BrowseName,
            4 => DisplayName,
            5 => Description,
            6 => WriteMask,
            7 => UserWriteMask,
            8 => IsAbstract,
            9 => Symmetric,
            10 => InverseName,
            11 => ContainsNoLoops,
            12 => EventNotifier,
            13 => Value,
            14 => DataType,
            15 => ValueRank,
            16 => ArrayDimensions,
            17 => AccessLevel,
            18 => UserAccessLevel,
            19 => MinimumSamplingInterval,
            20 => Historizing,
            21 => Executable,
            22 => UserExecutable,
            23 => DataTypeDefinition,
            24 => RolePermissions,
            25 => UserRolePermissions,
            26 => AccessRestrictions,
            _ => return None,
        })
    }
}

// ── IndexRange ────────────────────────────────────────────────────────────────

/// A parsed numeric range, e.g. `"2"` or `"1:3"` (single dimension only).
///
/// Bounds are inclusive, per the OPC UA NumericRange syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRange {
    pub low: u32,
    pub high: u32,
}

impl IndexRange {
    pub fn len(&self) -> usize {
        (self.high - self.low + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        false // low <= high is enforced at parse time
    }

    /// Parse the textual range. Empty or absent strings mean "no range" and
    /// are handled by callers before parsing.
    pub fn parse(text: &str) -> Result<IndexRange, StatusCode> {
        let parse_bound = |s: &str| -> Result<u32, StatusCode> {
            s.parse().map_err(|_| StatusCode::BAD_INDEX_RANGE_INVALID)
        };
        match text.split_once(':') {
            Some((lo, hi)) => {
                let low = parse_bound(lo)?;
                let high = parse_bound(hi)?;
                // a:b requires a < b; equal bounds must use the single form
                if low >= high {
                    return Err(StatusCode::BAD_INDEX_RANGE_INVALID);
                }
                Ok(IndexRange { low, high })
            }
            None => {
                let v = parse_bound(text)?;
                Ok(IndexRange { low: v, high: v })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_display_and_parse() {
        let id = NodeId::numeric(0, 2259);
        assert_eq!(id.to_string(), "i=2259");
        assert_eq!("ns=0;i=2259".parse::<NodeId>().unwrap(), id);
        assert_eq!("i=2259".parse::<NodeId>().unwrap(), id);

        let id = NodeId::string(3, "Engine.Speed");
        assert_eq!(id.to_string(), "ns=3;s=Engine.Speed");
        assert_eq!("ns=3;s=Engine.Speed".parse::<NodeId>().unwrap(), id);
    }

    #[test]
    fn node_id_parse_rejects_garbage() {
        assert!("x=12".parse::<NodeId>().is_err());
        assert!("ns=a;i=1".parse::<NodeId>().is_err());
        assert!("ns=1".parse::<NodeId>().is_err());
    }

    #[test]
    fn ns0_numeric_accessor() {
        assert_eq!(NodeId::numeric(0, 85).as_ns0_numeric(), Some(85));
        assert_eq!(NodeId::numeric(2, 85).as_ns0_numeric(), None);
        assert_eq!(NodeId::string(0, "x").as_ns0_numeric(), None);
    }

    #[test]
    fn variant_ranks() {
        assert_eq!(Variant::Int32(4).value_rank(), -1);
        let arr = Variant::Array {
            element_type: VariantType::Byte,
            values: vec![Variant::Byte(1)],
            dimensions: None,
        };
        assert_eq!(arr.value_rank(), 1);
        let matrix = Variant::Array {
            element_type: VariantType::Byte,
            values: vec![Variant::Byte(1); 6],
            dimensions: Some(vec![2, 3]),
        };
        assert_eq!(matrix.value_rank(), 2);
    }

    #[test]
    fn attribute_id_round_trip() {
        assert_eq!(AttributeId::from_u32(13), Some(AttributeId::Value));
        assert_eq!(AttributeId::from_u32(26), Some(AttributeId::AccessRestrictions));
        assert_eq!(AttributeId::from_u32(0), None);
        assert_eq!(AttributeId::from_u32(27), None);
    }

    #[test]
    fn index_range_parse() {
        assert_eq!(IndexRange::parse("4").unwrap(), IndexRange { low: 4, high: 4 });
        assert_eq!(IndexRange::parse("1:3").unwrap(), IndexRange { low: 1, high: 3 });
        assert!(IndexRange::parse("3:1").is_err());
        assert!(IndexRange::parse("2:2").is_err());
        assert!(IndexRange::parse("a").is_err());
    }

    #[test]
    fn unix_epoch_conversion() {
        assert_eq!(ticks_from_unix_millis(0), UNIX_EPOCH_TICKS);
        assert_eq!(ticks_from_unix_millis(1), UNIX_EPOCH_TICKS + 10_000);
    }
}
