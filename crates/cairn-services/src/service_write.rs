//! The Write service.
//!
//! Each WriteValue walks the full gauntlet: node resolution, the
//! Variable/Value rule, type compatibility (subtypes, the two
//! ByteString/Byte-array conversions, value-rank inclusion), access levels,
//! authorization, then the atomic store update. Local treatments skip the
//! access and authorization steps but never the type check.

use cairn_core::messages::WriteValue;
use cairn_core::status::StatusCode;
use cairn_core::types::{
    AttributeId, DataValue, IndexRange, NodeId, Variant, VariantType,
};

use crate::address_space::{access_level, ns0, AddressSpace, NodeClass};
use crate::authorization::is_authorized;
use crate::deps::{CallContext, OperationType, UserAuthZ};

/// A successful write, reported so subscriptions can fire.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChange {
    pub node: NodeId,
    pub attribute: AttributeId,
    pub value: DataValue,
}

/// Process a Write request's items. Returns the service status, per-item
/// results, and the data changes that fired.
///
/// The service status is `Good` unless the whole request is malformed; when
/// every item failed with one identical code, that code is promoted.
pub fn handle_write(
    ctx: &CallContext,
    space: &mut dyn AddressSpace,
    authz: &dyn UserAuthZ,
    nodes_to_write: &[WriteValue],
    max_operations: usize,
    utc_now: i64,
) -> Result<(StatusCode, Vec<StatusCode>, Vec<DataChange>), StatusCode> {
    if nodes_to_write.is_empty() {
        return Err(StatusCode::BAD_NOTHING_TO_DO);
    }
    if nodes_to_write.len() > max_operations {
        return Err(StatusCode::BAD_TOO_MANY_OPERATIONS);
    }

    let mut results = Vec::with_capacity(nodes_to_write.len());
    let mut changes = Vec::new();
    for item in nodes_to_write {
        match write_one(ctx, space, authz, item, utc_now) {
            Ok(change) => {
                results.push(StatusCode::GOOD);
                changes.push(change);
            }
            Err(status) => {
                tracing::debug!(node = %item.node_id, %status, "write rejected");
                results.push(status);
            }
        }
    }
    Ok((promote_service_status(&results), results, changes))
}

/// If every item failed with the same code, promote it to the service level.
fn promote_service_status(results: &[StatusCode]) -> StatusCode {
    let first = results[0];
    if first.is_bad() && results.iter().all(|&r| r == first) {
        first
    } else {
        StatusCode::GOOD
    }
}

fn write_one(
    ctx: &CallContext,
    space: &mut dyn AddressSpace,
    authz: &dyn UserAuthZ,
    item: &WriteValue,
    utc_now: i64,
) -> Result<DataChange, StatusCode> {
    let node = &item.node_id;
    let attribute =
        AttributeId::from_u32(item.attribute_id).ok_or(StatusCode::BAD_ATTRIBUTE_ID_INVALID)?;

    let class = space
        .node_class(node)
        .ok_or(StatusCode::BAD_NODE_ID_UNKNOWN)?;
    if class != NodeClass::Variable || attribute != AttributeId::Value {
        return Err(StatusCode::BAD_NOT_WRITABLE);
    }

    let range = match item.index_range.as_deref() {
        None | Some("") => None,
        Some(text) => Some(IndexRange::parse(text)?),
    };

    let converted = check_and_convert_type(space, node, item.value.value.clone())?;

    if !ctx.local {
        let access = space.access_level(node);
        if access & access_level::CURRENT_WRITE == 0 {
            return Err(StatusCode::BAD_NOT_WRITABLE);
        }
        // Status and timestamp sub-attributes need their own access bits;
        // without them the incoming sub-attributes must be empty/ok.
        if item.value.status != StatusCode::GOOD && access & access_level::STATUS_WRITE == 0 {
            return Err(StatusCode::BAD_WRITE_NOT_SUPPORTED);
        }
        if item.value.source_timestamp.is_some() && access & access_level::TIMESTAMP_WRITE == 0 {
            return Err(StatusCode::BAD_WRITE_NOT_SUPPORTED);
        }
        if !is_authorized(
            false,
            authz,
            space,
            &ctx.user,
            OperationType::Write,
            node,
            attribute,
        ) {
            return Err(StatusCode::BAD_USER_ACCESS_DENIED);
        }
    }

    let stored = DataValue {
        value: converted,
        status: item.value.status,
        source_timestamp: item.value.source_timestamp,
        server_timestamp: Some(utc_now),
    };
    space.write(node, attribute, range.as_ref(), stored.clone())?;

    Ok(DataChange {
        node: node.clone(),
        attribute,
        value: stored,
    })
}

/// Type-compatibility check, with the two permitted ByteString conversions
/// applied. Returns the (possibly converted) value to store.
fn check_and_convert_type(
    space: &dyn AddressSpace,
    node: &NodeId,
    value: Option<Variant>,
) -> Result<Option<Variant>, StatusCode> {
    let Some(value) = value else {
        // A null write clears the value; there is nothing to type-check
        return Ok(None);
    };
    if matches!(value, Variant::Empty) {
        return Ok(Some(value));
    }

    let target_type = space.data_type(node).ok_or(StatusCode::BAD_TYPE_MISMATCH)?;
    let target_rank = space.value_rank(node);

    // ByteString scalar -> Byte one-dimensional array
    if let Variant::ByteString(Some(bytes)) = &value {
        if target_type == VariantType::Byte.data_type_id() && rank_allows(target_rank, 1) {
            return Ok(Some(Variant::Array {
                element_type: VariantType::Byte,
                values: bytes.iter().map(|&b| Variant::Byte(b)).collect(),
                dimensions: None,
            }));
        }
    }
    // Byte one-dimensional array -> ByteString scalar
    if let Variant::Array {
        element_type: VariantType::Byte,
        values,
        dimensions: None,
    } = &value
    {
        if target_type == VariantType::ByteString.data_type_id() && rank_allows(target_rank, -1) {
            let packed: Vec<u8> = values
                .iter()
                .map(|v| match v {
                    Variant::Byte(b) => *b,
                    _ => 0,
                })
                .collect();
            return Ok(Some(Variant::ByteString(Some(packed))));
        }
    }

    if !rank_allows(target_rank, value.value_rank()) {
        return Err(StatusCode::BAD_TYPE_MISMATCH);
    }

    let source_type = value.type_id().ok_or(StatusCode::BAD_TYPE_MISMATCH)?;
    let source_data_type = source_type.data_type_id();
    let compatible = source_data_type == target_type
        || space.is_type_subtype_of(&source_data_type, &target_type)
        // Enumerations travel as Int32
        || (source_type == VariantType::Int32
            && space.is_type_subtype_of(&target_type, &NodeId::numeric(0, ns0::ENUMERATION)));
    if compatible {
        Ok(Some(value))
    } else {
        Err(StatusCode::BAD_TYPE_MISMATCH)
    }
}

/// Value-rank inclusion: `-1` scalar only, `0` anything, `n` exactly n
/// dimensions.
fn rank_allows(target_rank: i32, source_rank: i32) -> bool {
    match target_rank {
        0 => true,
        rank => rank == source_rank,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::MemoryAddressSpace;
    use crate::deps::PermissiveAuthZ;

    fn ctx() -> CallContext {
        CallContext {
            channel: Some(1),
            session: Some(1),
            user: crate::deps::User::anonymous(),
            locales: vec![],
            local: false,
        }
    }

    fn write_value(node: NodeId, value: Variant) -> WriteValue {
        WriteValue {
            node_id: node,
            attribute_id: AttributeId::Value as u32,
            index_range: None,
            value: DataValue::new(value),
        }
    }

    fn space() -> MemoryAddressSpace {
        let mut space = MemoryAddressSpace::with_ns0();
        space.add_variable(NodeId::string(2, "Int"), "Int", Variant::Int32(1));
        space.add_variable(
            NodeId::string(2, "Bytes"),
            "Bytes",
            Variant::ByteString(Some(vec![0, 0])),
        );
        space.add_variable_with_rank(
            NodeId::string(2, "ByteArr"),
            "ByteArr",
            Variant::Array {
                element_type: VariantType::Byte,
                values: vec![Variant::Byte(0); 4],
                dimensions: None,
            },
            VariantType::Byte.data_type_id(),
            1,
            access_level::CURRENT_READ | access_level::CURRENT_WRITE,
        );
        space
    }

    #[test]
    fn successful_write_reports_change() {
        let mut space = space();
        let (service, results, changes) = handle_write(
            &ctx(),
            &mut space,
            &PermissiveAuthZ,
            &[write_value(NodeId::string(2, "Int"), Variant::Int32(42))],
            100,
            1_000,
        )
        .unwrap();
        assert_eq!(service, StatusCode::GOOD);
        assert_eq!(results, vec![StatusCode::GOOD]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].value.server_timestamp, Some(1_000));

        let dv = space
            .read(&NodeId::string(2, "Int"), AttributeId::Value, None)
            .unwrap();
        assert_eq!(dv.value, Some(Variant::Int32(42)));
    }

    #[test]
    fn unknown_node_and_type_mismatch() {
        let mut space = space();
        let (service, results, changes) = handle_write(
            &ctx(),
            &mut space,
            &PermissiveAuthZ,
            &[
                write_value(NodeId::string(2, "Ghost"), Variant::Int32(1)),
                write_value(NodeId::string(2, "Int"), Variant::String(Some("x".into()))),
            ],
            100,
            0,
        )
        .unwrap();
        assert_eq!(service, StatusCode::GOOD);
        assert_eq!(
            results,
            vec![StatusCode::BAD_NODE_ID_UNKNOWN, StatusCode::BAD_TYPE_MISMATCH]
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn only_value_of_variables_is_writable() {
        let mut space = space();
        let mut item = write_value(NodeId::string(2, "Int"), Variant::Int32(1));
        item.attribute_id = AttributeId::DisplayName as u32;
        let (_, results, _) = handle_write(
            &ctx(),
            &mut space,
            &PermissiveAuthZ,
            &[item],
            100,
            0,
        )
        .unwrap();
        assert_eq!(results, vec![StatusCode::BAD_NOT_WRITABLE]);

        // Objects reject value writes too
        let item = write_value(NodeId::numeric(0, ns0::SERVER), Variant::Int32(1));
        let (_, results, _) =
            handle_write(&ctx(), &mut space, &PermissiveAuthZ, &[item], 100, 0).unwrap();
        assert_eq!(results, vec![StatusCode::BAD_NOT_WRITABLE]);
    }

    #[test]
    fn bytestring_to_byte_array_conversion() {
        let mut space = space();
        let item = write_value(
            NodeId::string(2, "ByteArr"),
            Variant::ByteString(Some(vec![1, 2, 3, 4])),
        );
        let (_, results, changes) =
            handle_write(&ctx(), &mut space, &PermissiveAuthZ, &[item], 100, 0).unwrap();
        assert_eq!(results, vec![StatusCode::GOOD]);
        match &changes[0].value.value {
            Some(Variant::Array {
                element_type: VariantType::Byte,
                values,
                ..
            }) => assert_eq!(values.len(), 4),
            other => panic!("expected byte array, got {other:?}"),
        }
    }

    #[test]
    fn byte_array_to_bytestring_conversion() {
        let mut space = space();
        let item = write_value(
            NodeId::string(2, "Bytes"),
            Variant::Array {
                element_type: VariantType::Byte,
                values: vec![Variant::Byte(9), Variant::Byte(8)],
                dimensions: None,
            },
        );
        let (_, results, changes) =
            handle_write(&ctx(), &mut space, &PermissiveAuthZ, &[item], 100, 0).unwrap();
        assert_eq!(results, vec![StatusCode::GOOD]);
        assert_eq!(
            changes[0].value.value,
            Some(Variant::ByteString(Some(vec![9, 8])))
        );
    }

    #[test]
    fn value_rank_mismatch_is_type_mismatch() {
        let mut space = space();
        // Scalar Int32 target refuses an Int32 array
        let item = write_value(
            NodeId::string(2, "Int"),
            Variant::Array {
                element_type: VariantType::Int32,
                values: vec![Variant::Int32(1)],
                dimensions: None,
            },
        );
        let (_, results, _) =
            handle_write(&ctx(), &mut space, &PermissiveAuthZ, &[item], 100, 0).unwrap();
        assert_eq!(results, vec![StatusCode::BAD_TYPE_MISMATCH]);
    }

    #[test]
    fn numeric_subtype_accepted_for_wider_target() {
        let mut space = space();
        // A variable typed Number (i=26) accepts an Int32 value
        space.add_variable_typed(
            NodeId::string(2, "Num"),
            "Num",
            Variant::Double(0.0),
            NodeId::numeric(0, 26),
            access_level::CURRENT_READ | access_level::CURRENT_WRITE,
        );
        let item = write_value(NodeId::string(2, "Num"), Variant::Int32(5));
        let (_, results, _) =
            handle_write(&ctx(), &mut space, &PermissiveAuthZ, &[item], 100, 0).unwrap();
        assert_eq!(results, vec![StatusCode::GOOD]);
    }

    #[test]
    fn enumeration_accepts_int32() {
        let mut space = space();
        space.add_variable_typed(
            NodeId::string(2, "State"),
            "State",
            Variant::Int32(0),
            NodeId::numeric(0, ns0::SERVER_STATE_DATA_TYPE),
            access_level::CURRENT_READ | access_level::CURRENT_WRITE,
        );
        let item = write_value(NodeId::string(2, "State"), Variant::Int32(3));
        let (_, results, _) =
            handle_write(&ctx(), &mut space, &PermissiveAuthZ, &[item], 100, 0).unwrap();
        assert_eq!(results, vec![StatusCode::GOOD]);
    }

    #[test]
    fn access_level_gates_remote_but_not_local_writes() {
        let mut space = space();
        space.set_access_level(&NodeId::string(2, "Int"), access_level::CURRENT_READ);

        let item = write_value(NodeId::string(2, "Int"), Variant::Int32(2));
        let (service, results, _) =
            handle_write(&ctx(), &mut space, &PermissiveAuthZ, &[item.clone()], 100, 0).unwrap();
        assert_eq!(results, vec![StatusCode::BAD_NOT_WRITABLE]);
        // A lone failure with one code is promoted to the service status
        assert_eq!(service, StatusCode::BAD_NOT_WRITABLE);

        let local = CallContext::local_treatment();
        let (_, results, changes) =
            handle_write(&local, &mut space, &PermissiveAuthZ, &[item], 100, 0).unwrap();
        assert_eq!(results, vec![StatusCode::GOOD]);
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn status_and_timestamp_writes_need_access_bits() {
        let mut space = space();
        let mut item = write_value(NodeId::string(2, "Int"), Variant::Int32(2));
        item.value.status = StatusCode::BAD_INTERNAL_ERROR;
        let (_, results, _) =
            handle_write(&ctx(), &mut space, &PermissiveAuthZ, &[item], 100, 0).unwrap();
        assert_eq!(results, vec![StatusCode::BAD_WRITE_NOT_SUPPORTED]);

        let mut item = write_value(NodeId::string(2, "Int"), Variant::Int32(2));
        item.value.source_timestamp = Some(5);
        let (_, results, _) =
            handle_write(&ctx(), &mut space, &PermissiveAuthZ, &[item], 100, 0).unwrap();
        assert_eq!(results, vec![StatusCode::BAD_WRITE_NOT_SUPPORTED]);

        // With the bits granted, both pass
        space.set_access_level(
            &NodeId::string(2, "Int"),
            access_level::CURRENT_READ
                | access_level::CURRENT_WRITE
                | access_level::STATUS_WRITE
                | access_level::TIMESTAMP_WRITE,
        );
        let mut item = write_value(NodeId::string(2, "Int"), Variant::Int32(2));
        item.value.status = StatusCode::BAD_INTERNAL_ERROR;
        item.value.source_timestamp = Some(5);
        let (_, results, _) =
            handle_write(&ctx(), &mut space, &PermissiveAuthZ, &[item], 100, 0).unwrap();
        assert_eq!(results, vec![StatusCode::GOOD]);
    }

    #[test]
    fn empty_and_oversize_requests_fault() {
        let mut space = space();
        assert_eq!(
            handle_write(&ctx(), &mut space, &PermissiveAuthZ, &[], 100, 0),
            Err(StatusCode::BAD_NOTHING_TO_DO)
        );
        let items: Vec<WriteValue> = (0..3)
            .map(|i| write_value(NodeId::string(2, "Int"), Variant::Int32(i)))
            .collect();
        assert_eq!(
            handle_write(&ctx(), &mut space, &PermissiveAuthZ, &items, 2, 0),
            Err(StatusCode::BAD_TOO_MANY_OPERATIONS)
        );
    }

    #[test]
    fn index_range_write_updates_slice() {
        let mut space = space();
        let mut item = write_value(
            NodeId::string(2, "ByteArr"),
            Variant::Array {
                element_type: VariantType::Byte,
                values: vec![Variant::Byte(7), Variant::Byte(8)],
                dimensions: None,
            },
        );
        item.index_range = Some("1:2".into());
        let (_, results, _) =
            handle_write(&ctx(), &mut space, &PermissiveAuthZ, &[item], 100, 0).unwrap();
        assert_eq!(results, vec![StatusCode::GOOD]);

        let dv = space
            .read(&NodeId::string(2, "ByteArr"), AttributeId::Value, None)
            .unwrap();
        assert_eq!(
            dv.value,
            Some(Variant::Array {
                element_type: VariantType::Byte,
                values: vec![
                    Variant::Byte(0),
                    Variant::Byte(7),
                    Variant::Byte(8),
                    Variant::Byte(0),
                ],
                dimensions: None,
            })
        );
    }
}
