//! The address-space seam and the in-memory node store.
//!
//! The engine treats node storage as opaque: everything flows through the
//! [`AddressSpace`] trait. [`MemoryAddressSpace`] is the store the demo
//! server and the test suite use — a flat node map seeded with the handful
//! of ns=0 nodes the toolkit itself relies on (type hierarchy for the write
//! type checks, the Server object for clients to find).

use std::collections::HashMap;

use cairn_core::status::StatusCode;
use cairn_core::types::{
    AttributeId, DataValue, ExpandedNodeId, IndexRange, LocalizedText, NodeId, QualifiedName,
    Variant, VariantType,
};

use crate::authorization::PermissionSet;

// ── Node metadata ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NodeClass {
    Object = 1,
    Variable = 2,
    Method = 4,
    ObjectType = 8,
    VariableType = 16,
    ReferenceType = 32,
    DataType = 64,
    View = 128,
}

/// AccessLevel bit flags (Part 3).
pub mod access_level {
    pub const CURRENT_READ: u8 = 0x01;
    pub const CURRENT_WRITE: u8 = 0x02;
    pub const HISTORY_READ: u8 = 0x04;
    pub const HISTORY_WRITE: u8 = 0x08;
    pub const SEMANTIC_CHANGE: u8 = 0x10;
    pub const STATUS_WRITE: u8 = 0x20;
    pub const TIMESTAMP_WRITE: u8 = 0x40;
}

/// Well-known ns=0 ids the engine needs by name.
pub mod ns0 {
    pub const ENUMERATION: u32 = 29;
    pub const ROOT_FOLDER: u32 = 84;
    pub const OBJECTS_FOLDER: u32 = 85;
    pub const HIERARCHICAL_REFERENCES: u32 = 33;
    pub const HAS_SUBTYPE: u32 = 45;
    pub const HAS_PROPERTY: u32 = 46;
    pub const HAS_COMPONENT: u32 = 47;
    pub const ORGANIZES: u32 = 35;
    pub const SERVER: u32 = 2253;
    pub const SERVER_STATUS: u32 = 2256;
    pub const SERVER_STATUS_CURRENT_TIME: u32 = 2258;
    pub const SERVER_STATUS_STATE: u32 = 2259;
    pub const SERVER_STATE_DATA_TYPE: u32 = 852;
}

/// A node-or-namespace scoped grant of permissions to one role.
#[derive(Debug, Clone, PartialEq)]
pub struct RolePermission {
    pub role: NodeId,
    pub permissions: PermissionSet,
}

/// One reference as the browse service sees it: fully resolved target
/// metadata so browsing never needs a second lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub reference_type: NodeId,
    pub is_forward: bool,
    pub target: ExpandedNodeId,
    pub target_class: NodeClass,
    pub browse_name: QualifiedName,
    pub display_name: LocalizedText,
    pub type_definition: ExpandedNodeId,
}

// ── The seam ──────────────────────────────────────────────────────────────────

pub trait AddressSpace: Send + Sync {
    fn node_class(&self, node: &NodeId) -> Option<NodeClass>;

    /// Read one attribute, applying an index range to Value reads.
    fn read(
        &self,
        node: &NodeId,
        attribute: AttributeId,
        range: Option<&IndexRange>,
    ) -> Result<DataValue, StatusCode>;

    /// Write the Value attribute. Type and access checks are the service
    /// layer's job; the store applies the range and replaces atomically.
    fn write(
        &mut self,
        node: &NodeId,
        attribute: AttributeId,
        range: Option<&IndexRange>,
        value: DataValue,
    ) -> Result<(), StatusCode>;

    fn iterate_references(&self, node: &NodeId) -> Vec<Reference>;

    fn data_type(&self, node: &NodeId) -> Option<NodeId>;

    /// Value rank: `-1` scalar, `0` any, `n` n-dimensional.
    fn value_rank(&self, node: &NodeId) -> i32;

    fn access_level(&self, node: &NodeId) -> u8;

    fn role_permissions(&self, node: &NodeId) -> Option<Vec<RolePermission>>;

    fn default_role_permissions(&self, namespace: u16) -> Option<Vec<RolePermission>>;

    /// Transitive subtype test over the type hierarchy (reflexive).
    fn is_type_subtype_of(&self, subtype: &NodeId, supertype: &NodeId) -> bool;
}

// ── Index ranges over variants ────────────────────────────────────────────────

/// Select `range` out of an array, string or bytestring value.
pub fn apply_range_read(value: &Variant, range: &IndexRange) -> Result<Variant, StatusCode> {
    let slice_bounds = |len: usize| -> Result<(usize, usize), StatusCode> {
        let low = range.low as usize;
        if low >= len {
            return Err(StatusCode::BAD_INDEX_RANGE_NO_DATA);
        }
        let high = (range.high as usize).min(len - 1);
        Ok((low, high))
    };
    match value {
        Variant::Array {
            element_type,
            values,
            dimensions: None,
        } => {
            let (low, high) = slice_bounds(values.len())?;
            Ok(Variant::Array {
                element_type: *element_type,
                values: values[low..=high].to_vec(),
                dimensions: None,
            })
        }
        Variant::String(Some(s)) => {
            let chars: Vec<char> = s.chars().collect();
            let (low, high) = slice_bounds(chars.len())?;
            Ok(Variant::String(Some(chars[low..=high].iter().collect())))
        }
        Variant::ByteString(Some(bytes)) => {
            let (low, high) = slice_bounds(bytes.len())?;
            Ok(Variant::ByteString(Some(bytes[low..=high].to_vec())))
        }
        _ => Err(StatusCode::BAD_INDEX_RANGE_NO_DATA),
    }
}

/// Replace `range` inside `target` with `source`. The source must carry
/// exactly as many elements as the range selects.
pub fn apply_range_write(
    target: &Variant,
    range: &IndexRange,
    source: &Variant,
) -> Result<Variant, StatusCode> {
    match (target, source) {
        (
            Variant::Array {
                element_type,
                values,
                dimensions: None,
            },
            Variant::Array {
                element_type: src_type,
                values: src_values,
                dimensions: None,
            },
        ) => {
            if element_type != src_type {
                return Err(StatusCode::BAD_TYPE_MISMATCH);
            }
            if src_values.len() != range.len() {
                return Err(StatusCode::BAD_INDEX_RANGE_INVALID);
            }
            let low = range.low as usize;
            let high = range.high as usize;
            if high >= values.len() {
                return Err(StatusCode::BAD_INDEX_RANGE_NO_DATA);
            }
            let mut updated = values.clone();
            updated[low..=high].clone_from_slice(src_values);
            Ok(Variant::Array {
                element_type: *element_type,
                values: updated,
                dimensions: None,
            })
        }
        (Variant::ByteString(Some(bytes)), Variant::ByteString(Some(src))) => {
            if src.len() != range.len() {
                return Err(StatusCode::BAD_INDEX_RANGE_INVALID);
            }
            let low = range.low as usize;
            let high = range.high as usize;
            if high >= bytes.len() {
                return Err(StatusCode::BAD_INDEX_RANGE_NO_DATA);
            }
            let mut updated = bytes.clone();
            updated[low..=high].copy_from_slice(src);
            Ok(Variant::ByteString(Some(updated)))
        }
        (Variant::String(Some(s)), Variant::String(Some(src))) => {
            let mut chars: Vec<char> = s.chars().collect();
            let src_chars: Vec<char> = src.chars().collect();
            if src_chars.len() != range.len() {
                return Err(StatusCode::BAD_INDEX_RANGE_INVALID);
            }
            let low = range.low as usize;
            let high = range.high as usize;
            if high >= chars.len() {
                return Err(StatusCode::BAD_INDEX_RANGE_NO_DATA);
            }
            chars[low..=high].clone_from_slice(&src_chars);
            Ok(Variant::String(Some(chars.into_iter().collect())))
        }
        _ => Err(StatusCode::BAD_INDEX_RANGE_NO_DATA),
    }
}

// ── In-memory store ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct VariableData {
    value: DataValue,
    data_type: NodeId,
    value_rank: i32,
    access_level: u8,
}

#[derive(Debug, Clone)]
struct Node {
    class: NodeClass,
    browse_name: QualifiedName,
    display_name: LocalizedText,
    variable: Option<VariableData>,
    role_permissions: Option<Vec<RolePermission>>,
    references: Vec<Reference>,
    type_definition: Option<NodeId>,
}

/// Flat in-memory address space.
pub struct MemoryAddressSpace {
    nodes: HashMap<NodeId, Node>,
    namespace_defaults: HashMap<u16, Vec<RolePermission>>,
    /// child type -> parent type, for the transitive subtype test.
    subtypes: HashMap<NodeId, NodeId>,
}

impl MemoryAddressSpace {
    pub fn new() -> Self {
        MemoryAddressSpace {
            nodes: HashMap::new(),
            namespace_defaults: HashMap::new(),
            subtypes: HashMap::new(),
        }
    }

    /// A store seeded with the ns=0 skeleton: the built-in data type
    /// hierarchy, reference types, and the Server object with its status
    /// variables.
    pub fn with_ns0() -> Self {
        let mut space = MemoryAddressSpace::new();
        space.seed_type_hierarchy();
        space.seed_server_nodes();
        space
    }

    fn seed_type_hierarchy(&mut self) {
        let pairs: &[(u32, u32)] = &[
            // Data types: child, parent
            (1, 24),  // Boolean -> BaseDataType
            (2, 27),  // SByte -> Integer
            (3, 28),  // Byte -> UInteger
            (4, 27),  // Int16 -> Integer
            (5, 28),  // UInt16 -> UInteger
            (6, 27),  // Int32 -> Integer
            (7, 28),  // UInt32 -> UInteger
            (8, 27),  // Int64 -> Integer
            (9, 28),  // UInt64 -> UInteger
            (10, 26), // Float -> Number
            (11, 26), // Double -> Number
            (12, 24), // String -> BaseDataType
            (13, 24), // DateTime -> BaseDataType
            (14, 24), // Guid -> BaseDataType
            (15, 24), // ByteString -> BaseDataType
            (27, 26), // Integer -> Number
            (28, 26), // UInteger -> Number
            (26, 24), // Number -> BaseDataType
            (29, 24), // Enumeration -> BaseDataType
            (290, 11), // Duration -> Double
            (294, 13), // UtcTime -> DateTime
            (ns0::SERVER_STATE_DATA_TYPE, 29), // ServerState -> Enumeration
            // Reference types
            (34, 33), // HasChild -> HierarchicalReferences
            (35, 33), // Organizes -> HierarchicalReferences
            (44, 34), // Aggregates -> HasChild
            (45, 34), // HasSubtype -> HasChild
            (46, 44), // HasProperty -> Aggregates
            (47, 44), // HasComponent -> Aggregates
        ];
        for (child, parent) in pairs {
            self.subtypes
                .insert(NodeId::numeric(0, *child), NodeId::numeric(0, *parent));
        }
    }

    fn seed_server_nodes(&mut self) {
        self.add_object(NodeId::numeric(0, ns0::ROOT_FOLDER), "Root");
        self.add_object(NodeId::numeric(0, ns0::OBJECTS_FOLDER), "Objects");
        self.add_object(NodeId::numeric(0, ns0::SERVER), "Server");
        self.add_object(NodeId::numeric(0, ns0::SERVER_STATUS), "ServerStatus");

        // ServerState enumeration, 0 = Running
        self.add_variable_typed(
            NodeId::numeric(0, ns0::SERVER_STATUS_STATE),
            "State",
            Variant::Int32(0),
            NodeId::numeric(0, ns0::SERVER_STATE_DATA_TYPE),
            access_level::CURRENT_READ,
        );
        self.add_variable_typed(
            NodeId::numeric(0, ns0::SERVER_STATUS_CURRENT_TIME),
            "CurrentTime",
            Variant::DateTime(0),
            NodeId::numeric(0, 294),
            access_level::CURRENT_READ,
        );

        self.add_reference(
            &NodeId::numeric(0, ns0::ROOT_FOLDER),
            NodeId::numeric(0, ns0::ORGANIZES),
            &NodeId::numeric(0, ns0::OBJECTS_FOLDER),
        );
        self.add_reference(
            &NodeId::numeric(0, ns0::OBJECTS_FOLDER),
            NodeId::numeric(0, ns0::ORGANIZES),
            &NodeId::numeric(0, ns0::SERVER),
        );
        self.add_reference(
            &NodeId::numeric(0, ns0::SERVER),
            NodeId::numeric(0, ns0::HAS_COMPONENT),
            &NodeId::numeric(0, ns0::SERVER_STATUS),
        );
        self.add_reference(
            &NodeId::numeric(0, ns0::SERVER_STATUS),
            NodeId::numeric(0, ns0::HAS_COMPONENT),
            &NodeId::numeric(0, ns0::SERVER_STATUS_STATE),
        );
        self.add_reference(
            &NodeId::numeric(0, ns0::SERVER_STATUS),
            NodeId::numeric(0, ns0::HAS_COMPONENT),
            &NodeId::numeric(0, ns0::SERVER_STATUS_CURRENT_TIME),
        );
    }

    pub fn add_object(&mut self, node_id: NodeId, name: &str) {
        self.nodes.insert(
            node_id.clone(),
            Node {
                class: NodeClass::Object,
                browse_name: QualifiedName::new(node_id.namespace, name),
                display_name: LocalizedText::new(name),
                variable: None,
                role_permissions: None,
                references: Vec::new(),
                type_definition: None,
            },
        );
    }

    /// Add a read/write variable whose data type is inferred from the value.
    pub fn add_variable(&mut self, node_id: NodeId, name: &str, value: Variant) {
        let data_type = value
            .type_id()
            .map(VariantType::data_type_id)
            .unwrap_or_else(NodeId::null);
        let rank = value.value_rank();
        self.add_variable_with_rank(
            node_id,
            name,
            value,
            data_type,
            rank,
            access_level::CURRENT_READ | access_level::CURRENT_WRITE,
        );
    }

    pub fn add_variable_typed(
        &mut self,
        node_id: NodeId,
        name: &str,
        value: Variant,
        data_type: NodeId,
        access: u8,
    ) {
        let rank = value.value_rank();
        self.add_variable_with_rank(node_id, name, value, data_type, rank, access);
    }

    pub fn add_variable_with_rank(
        &mut self,
        node_id: NodeId,
        name: &str,
        value: Variant,
        data_type: NodeId,
        value_rank: i32,
        access: u8,
    ) {
        self.nodes.insert(
            node_id.clone(),
            Node {
                class: NodeClass::Variable,
                browse_name: QualifiedName::new(node_id.namespace, name),
                display_name: LocalizedText::new(name),
                variable: Some(VariableData {
                    value: DataValue::new(value),
                    data_type,
                    value_rank,
                    access_level: access,
                }),
                role_permissions: None,
                references: Vec::new(),
                type_definition: None,
            },
        );
    }

    pub fn add_method(&mut self, node_id: NodeId, name: &str) {
        self.nodes.insert(
            node_id.clone(),
            Node {
                class: NodeClass::Method,
                browse_name: QualifiedName::new(node_id.namespace, name),
                display_name: LocalizedText::new(name),
                variable: None,
                role_permissions: None,
                references: Vec::new(),
                type_definition: None,
            },
        );
    }

    /// Add a forward reference from `source` to `target`, with the matching
    /// inverse reference on the target.
    pub fn add_reference(&mut self, source: &NodeId, reference_type: NodeId, target: &NodeId) {
        let target_meta = self.nodes.get(target).map(|n| {
            (
                n.class,
                n.browse_name.clone(),
                n.display_name.clone(),
                n.type_definition.clone(),
            )
        });
        let source_meta = self.nodes.get(source).map(|n| {
            (
                n.class,
                n.browse_name.clone(),
                n.display_name.clone(),
                n.type_definition.clone(),
            )
        });
        if let (Some((t_class, t_bn, t_dn, t_td)), Some((s_class, s_bn, s_dn, s_td))) =
            (target_meta, source_meta)
        {
            if let Some(node) = self.nodes.get_mut(source) {
                node.references.push(Reference {
                    reference_type: reference_type.clone(),
                    is_forward: true,
                    target: ExpandedNodeId::from(target.clone()),
                    target_class: t_class,
                    browse_name: t_bn,
                    display_name: t_dn,
                    type_definition: t_td
                        .map(ExpandedNodeId::from)
                        .unwrap_or_default(),
                });
            }
            if let Some(node) = self.nodes.get_mut(target) {
                node.references.push(Reference {
                    reference_type,
                    is_forward: false,
                    target: ExpandedNodeId::from(source.clone()),
                    target_class: s_class,
                    browse_name: s_bn,
                    display_name: s_dn,
                    type_definition: s_td
                        .map(ExpandedNodeId::from)
                        .unwrap_or_default(),
                });
            }
        }
    }

    pub fn set_role_permissions(&mut self, node: &NodeId, permissions: Vec<RolePermission>) {
        if let Some(node) = self.nodes.get_mut(node) {
            node.role_permissions = Some(permissions);
        }
    }

    pub fn set_default_role_permissions(
        &mut self,
        namespace: u16,
        permissions: Vec<RolePermission>,
    ) {
        self.namespace_defaults.insert(namespace, permissions);
    }

    pub fn set_access_level(&mut self, node: &NodeId, access: u8) {
        if let Some(data) = self.nodes.get_mut(node).and_then(|n| n.variable.as_mut()) {
            data.access_level = access;
        }
    }

    pub fn add_subtype(&mut self, child: NodeId, parent: NodeId) {
        self.subtypes.insert(child, parent);
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.nodes.contains_key(node)
    }
}

impl Default for MemoryAddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace for MemoryAddressSpace {
    fn node_class(&self, node: &NodeId) -> Option<NodeClass> {
        self.nodes.get(node).map(|n| n.class)
    }

    fn read(
        &self,
        node_id: &NodeId,
        attribute: AttributeId,
        range: Option<&IndexRange>,
    ) -> Result<DataValue, StatusCode> {
        let node = self
            .nodes
            .get(node_id)
            .ok_or(StatusCode::BAD_NODE_ID_UNKNOWN)?;
        let value = match attribute {
            AttributeId::NodeId => Variant::NodeId(node_id.clone()),
            AttributeId::NodeClass => Variant::Int32(node.class as i32),
            AttributeId::BrowseName => Variant::QualifiedName(node.browse_name.clone()),
            AttributeId::DisplayName => Variant::LocalizedText(node.display_name.clone()),
            AttributeId::Value => {
                let data = node
                    .variable
                    .as_ref()
                    .ok_or(StatusCode::BAD_ATTRIBUTE_ID_INVALID)?;
                let mut result = data.value.clone();
                if let (Some(range), Some(value)) = (range, &result.value) {
                    result.value = Some(apply_range_read(value, range)?);
                }
                return Ok(result);
            }
            AttributeId::DataType => {
                let data = node
                    .variable
                    .as_ref()
                    .ok_or(StatusCode::BAD_ATTRIBUTE_ID_INVALID)?;
                Variant::NodeId(data.data_type.clone())
            }
            AttributeId::ValueRank => Variant::Int32(self.value_rank(node_id)),
            AttributeId::AccessLevel | AttributeId::UserAccessLevel => {
                let data = node
                    .variable
                    .as_ref()
                    .ok_or(StatusCode::BAD_ATTRIBUTE_ID_INVALID)?;
                Variant::Byte(data.access_level)
            }
            _ => return Err(StatusCode::BAD_ATTRIBUTE_ID_INVALID),
        };
        Ok(DataValue::new(value))
    }

    fn write(
        &mut self,
        node_id: &NodeId,
        attribute: AttributeId,
        range: Option<&IndexRange>,
        value: DataValue,
    ) -> Result<(), StatusCode> {
        if attribute != AttributeId::Value {
            return Err(StatusCode::BAD_NOT_WRITABLE);
        }
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or(StatusCode::BAD_NODE_ID_UNKNOWN)?;
        let data = node
            .variable
            .as_mut()
            .ok_or(StatusCode::BAD_NOT_WRITABLE)?;
        let stored = match (range, &value.value, &data.value.value) {
            (Some(range), Some(incoming), Some(current)) => {
                let merged = apply_range_write(current, range, incoming)?;
                DataValue {
                    value: Some(merged),
                    ..value
                }
            }
            (Some(_), _, _) => return Err(StatusCode::BAD_INDEX_RANGE_NO_DATA),
            (None, _, _) => value,
        };
        // Single assignment: readers never observe a half-applied write
        data.value = stored;
        Ok(())
    }

    fn iterate_references(&self, node: &NodeId) -> Vec<Reference> {
        self.nodes
            .get(node)
            .map(|n| n.references.clone())
            .unwrap_or_default()
    }

    fn data_type(&self, node: &NodeId) -> Option<NodeId> {
        self.nodes
            .get(node)
            .and_then(|n| n.variable.as_ref())
            .map(|v| v.data_type.clone())
    }

    fn value_rank(&self, node: &NodeId) -> i32 {
        self.nodes
            .get(node)
            .and_then(|n| n.variable.as_ref())
            .map(|v| v.value_rank)
            .unwrap_or(-1)
    }

    fn access_level(&self, node: &NodeId) -> u8 {
        self.nodes
            .get(node)
            .and_then(|n| n.variable.as_ref())
            .map(|v| v.access_level)
            .unwrap_or(0)
    }

    fn role_permissions(&self, node: &NodeId) -> Option<Vec<RolePermission>> {
        self.nodes.get(node).and_then(|n| n.role_permissions.clone())
    }

    fn default_role_permissions(&self, namespace: u16) -> Option<Vec<RolePermission>> {
        self.namespace_defaults.get(&namespace).cloned()
    }

    fn is_type_subtype_of(&self, subtype: &NodeId, supertype: &NodeId) -> bool {
        if subtype == supertype {
            return true;
        }
        let mut current = subtype;
        // The hierarchy is a tree; depth is bounded in practice but guard
        // against a cycle introduced by host data.
        for _ in 0..32 {
            match self.subtypes.get(current) {
                Some(parent) if parent == supertype => return true,
                Some(parent) => current = parent,
                None => return false,
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ns0_seed_has_server_state() {
        let space = MemoryAddressSpace::with_ns0();
        let state = NodeId::numeric(0, ns0::SERVER_STATUS_STATE);
        assert_eq!(space.node_class(&state), Some(NodeClass::Variable));
        let dv = space.read(&state, AttributeId::Value, None).unwrap();
        assert_eq!(dv.value, Some(Variant::Int32(0)));
        assert_eq!(
            space.data_type(&state),
            Some(NodeId::numeric(0, ns0::SERVER_STATE_DATA_TYPE))
        );
    }

    #[test]
    fn unknown_node_reads_fail() {
        let space = MemoryAddressSpace::with_ns0();
        assert_eq!(
            space.read(&NodeId::numeric(7, 1), AttributeId::Value, None),
            Err(StatusCode::BAD_NODE_ID_UNKNOWN)
        );
    }

    #[test]
    fn missing_optional_attribute_is_invalid() {
        let space = MemoryAddressSpace::with_ns0();
        // Objects have no Value attribute
        assert_eq!(
            space.read(
                &NodeId::numeric(0, ns0::SERVER),
                AttributeId::Value,
                None
            ),
            Err(StatusCode::BAD_ATTRIBUTE_ID_INVALID)
        );
    }

    #[test]
    fn subtype_chain_resolves() {
        let space = MemoryAddressSpace::with_ns0();
        let int32 = NodeId::numeric(0, 6);
        let integer = NodeId::numeric(0, 27);
        let number = NodeId::numeric(0, 26);
        let string = NodeId::numeric(0, 12);
        assert!(space.is_type_subtype_of(&int32, &int32));
        assert!(space.is_type_subtype_of(&int32, &integer));
        assert!(space.is_type_subtype_of(&int32, &number));
        assert!(!space.is_type_subtype_of(&int32, &string));
        assert!(!space.is_type_subtype_of(&number, &int32));
    }

    #[test]
    fn write_replaces_value_atomically() {
        let mut space = MemoryAddressSpace::with_ns0();
        let node = NodeId::string(2, "Counter");
        space.add_variable(node.clone(), "Counter", Variant::Int32(1));

        space
            .write(&node, AttributeId::Value, None, DataValue::new(Variant::Int32(2)))
            .unwrap();
        let dv = space.read(&node, AttributeId::Value, None).unwrap();
        assert_eq!(dv.value, Some(Variant::Int32(2)));
    }

    #[test]
    fn range_read_and_write_on_arrays() {
        let mut space = MemoryAddressSpace::with_ns0();
        let node = NodeId::string(2, "Samples");
        space.add_variable(
            node.clone(),
            "Samples",
            Variant::Array {
                element_type: VariantType::Int32,
                values: (0..5).map(Variant::Int32).collect(),
                dimensions: None,
            },
        );

        let range = IndexRange::parse("1:3").unwrap();
        let dv = space.read(&node, AttributeId::Value, Some(&range)).unwrap();
        assert_eq!(
            dv.value,
            Some(Variant::Array {
                element_type: VariantType::Int32,
                values: vec![Variant::Int32(1), Variant::Int32(2), Variant::Int32(3)],
                dimensions: None,
            })
        );

        let replacement = Variant::Array {
            element_type: VariantType::Int32,
            values: vec![Variant::Int32(10), Variant::Int32(11), Variant::Int32(12)],
            dimensions: None,
        };
        space
            .write(
                &node,
                AttributeId::Value,
                Some(&range),
                DataValue::new(replacement),
            )
            .unwrap();
        let dv = space.read(&node, AttributeId::Value, None).unwrap();
        assert_eq!(
            dv.value,
            Some(Variant::Array {
                element_type: VariantType::Int32,
                values: vec![
                    Variant::Int32(0),
                    Variant::Int32(10),
                    Variant::Int32(11),
                    Variant::Int32(12),
                    Variant::Int32(4),
                ],
                dimensions: None,
            })
        );
    }

    #[test]
    fn range_beyond_bounds_is_no_data() {
        let value = Variant::Array {
            element_type: VariantType::Byte,
            values: vec![Variant::Byte(1), Variant::Byte(2)],
            dimensions: None,
        };
        let range = IndexRange::parse("5:7").unwrap();
        assert_eq!(
            apply_range_read(&value, &range),
            Err(StatusCode::BAD_INDEX_RANGE_NO_DATA)
        );
        // Scalars never accept a range
        assert_eq!(
            apply_range_read(&Variant::Int32(1), &IndexRange::parse("0").unwrap()),
            Err(StatusCode::BAD_INDEX_RANGE_NO_DATA)
        );
    }

    #[test]
    fn range_write_length_mismatch_is_invalid() {
        let target = Variant::ByteString(Some(vec![1, 2, 3, 4]));
        let source = Variant::ByteString(Some(vec![9]));
        let range = IndexRange::parse("1:2").unwrap();
        assert_eq!(
            apply_range_write(&target, &range, &source),
            Err(StatusCode::BAD_INDEX_RANGE_INVALID)
        );
    }

    #[test]
    fn references_are_bidirectional() {
        let space = MemoryAddressSpace::with_ns0();
        let refs = space.iterate_references(&NodeId::numeric(0, ns0::SERVER_STATUS));
        assert!(refs
            .iter()
            .any(|r| r.is_forward
                && r.target.node_id == NodeId::numeric(0, ns0::SERVER_STATUS_STATE)));
        assert!(refs
            .iter()
            .any(|r| !r.is_forward && r.target.node_id == NodeId::numeric(0, ns0::SERVER)));
    }
}
