//! The Read service.
//!
//! The mirror of the write path: attribute resolution, IndexRange on Value
//! only, user access-level projection, role permissions, then the store
//! read with the requested timestamps attached.

use cairn_core::messages::ReadValueId;
use cairn_core::status::StatusCode;
use cairn_core::types::{AttributeId, DataValue, IndexRange};

use crate::address_space::{access_level, AddressSpace};
use crate::authorization::is_authorized;
use crate::deps::{CallContext, OperationType, UserAuthZ};

/// TimestampsToReturn wire values.
pub mod timestamps {
    pub const SOURCE: u32 = 0;
    pub const SERVER: u32 = 1;
    pub const BOTH: u32 = 2;
    pub const NEITHER: u32 = 3;
}

/// Process a Read request's items into per-item DataValues.
pub fn handle_read(
    ctx: &CallContext,
    space: &dyn AddressSpace,
    authz: &dyn UserAuthZ,
    nodes_to_read: &[ReadValueId],
    timestamps_to_return: u32,
    max_operations: usize,
    utc_now: i64,
) -> Result<Vec<DataValue>, StatusCode> {
    if nodes_to_read.is_empty() {
        return Err(StatusCode::BAD_NOTHING_TO_DO);
    }
    if nodes_to_read.len() > max_operations {
        return Err(StatusCode::BAD_TOO_MANY_OPERATIONS);
    }

    Ok(nodes_to_read
        .iter()
        .map(|item| {
            let mut dv = match read_one(ctx, space, authz, item) {
                Ok(dv) => dv,
                Err(status) => DataValue::status_only(status),
            };
            dv.server_timestamp = Some(utc_now);
            apply_timestamps(&mut dv, timestamps_to_return);
            dv
        })
        .collect())
}

fn read_one(
    ctx: &CallContext,
    space: &dyn AddressSpace,
    authz: &dyn UserAuthZ,
    item: &ReadValueId,
) -> Result<DataValue, StatusCode> {
    let node = &item.node_id;
    let attribute =
        AttributeId::from_u32(item.attribute_id).ok_or(StatusCode::BAD_ATTRIBUTE_ID_INVALID)?;
    space
        .node_class(node)
        .ok_or(StatusCode::BAD_NODE_ID_UNKNOWN)?;

    let range = match item.index_range.as_deref() {
        None | Some("") => None,
        Some(text) => {
            // IndexRange is only meaningful on Value
            if attribute != AttributeId::Value {
                return Err(StatusCode::BAD_INDEX_RANGE_NO_DATA);
            }
            Some(IndexRange::parse(text)?)
        }
    };

    if !ctx.local {
        if attribute == AttributeId::Value
            && space.access_level(node) & access_level::CURRENT_READ == 0
        {
            return Err(StatusCode::BAD_NOT_READABLE);
        }
        if !is_authorized(
            false,
            authz,
            space,
            &ctx.user,
            OperationType::Read,
            node,
            attribute,
        ) {
            return Err(StatusCode::BAD_USER_ACCESS_DENIED);
        }
    }

    space.read(node, attribute, range.as_ref())
}

fn apply_timestamps(dv: &mut DataValue, timestamps_to_return: u32) {
    match timestamps_to_return {
        timestamps::SOURCE => dv.server_timestamp = None,
        timestamps::SERVER => dv.source_timestamp = None,
        timestamps::BOTH => {}
        _ => {
            dv.source_timestamp = None;
            dv.server_timestamp = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::{ns0, MemoryAddressSpace, RolePermission};
    use crate::authorization::PermissionSet;
    use crate::deps::{roles, PermissiveAuthZ, User};
    use cairn_core::types::{NodeId, Variant};

    fn ctx() -> CallContext {
        CallContext {
            channel: Some(1),
            session: Some(1),
            user: User::anonymous(),
            locales: vec![],
            local: false,
        }
    }

    fn read_value(node: NodeId) -> ReadValueId {
        ReadValueId::value_of(node)
    }

    #[test]
    fn happy_path_server_state() {
        let space = MemoryAddressSpace::with_ns0();
        let results = handle_read(
            &ctx(),
            &space,
            &PermissiveAuthZ,
            &[read_value(NodeId::numeric(0, ns0::SERVER_STATUS_STATE))],
            timestamps::BOTH,
            100,
            42,
        )
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, StatusCode::GOOD);
        assert_eq!(results[0].value, Some(Variant::Int32(0)));
        assert_eq!(results[0].server_timestamp, Some(42));
    }

    #[test]
    fn unknown_node_is_per_item_status() {
        let space = MemoryAddressSpace::with_ns0();
        let results = handle_read(
            &ctx(),
            &space,
            &PermissiveAuthZ,
            &[
                read_value(NodeId::string(9, "missing")),
                read_value(NodeId::numeric(0, ns0::SERVER_STATUS_STATE)),
            ],
            timestamps::NEITHER,
            100,
            0,
        )
        .unwrap();
        assert_eq!(results[0].status, StatusCode::BAD_NODE_ID_UNKNOWN);
        assert!(results[0].value.is_none());
        assert_eq!(results[1].status, StatusCode::GOOD);
    }

    #[test]
    fn missing_attribute_reads_as_attribute_invalid() {
        let space = MemoryAddressSpace::with_ns0();
        let results = handle_read(
            &ctx(),
            &space,
            &PermissiveAuthZ,
            &[read_value(NodeId::numeric(0, ns0::SERVER))],
            timestamps::NEITHER,
            100,
            0,
        )
        .unwrap();
        assert_eq!(results[0].status, StatusCode::BAD_ATTRIBUTE_ID_INVALID);
    }

    #[test]
    fn index_range_only_on_value() {
        let space = MemoryAddressSpace::with_ns0();
        let mut item = read_value(NodeId::numeric(0, ns0::SERVER_STATUS_STATE));
        item.attribute_id = AttributeId::DisplayName as u32;
        item.index_range = Some("1".into());
        let results = handle_read(
            &ctx(),
            &space,
            &PermissiveAuthZ,
            &[item],
            timestamps::NEITHER,
            100,
            0,
        )
        .unwrap();
        assert_eq!(results[0].status, StatusCode::BAD_INDEX_RANGE_NO_DATA);
    }

    #[test]
    fn access_level_denies_unreadable_value() {
        let mut space = MemoryAddressSpace::with_ns0();
        let node = NodeId::string(2, "Hidden");
        space.add_variable(node.clone(), "Hidden", Variant::Int32(1));
        space.set_access_level(&node, access_level::CURRENT_WRITE);

        let results = handle_read(
            &ctx(),
            &space,
            &PermissiveAuthZ,
            &[read_value(node.clone())],
            timestamps::NEITHER,
            100,
            0,
        )
        .unwrap();
        assert_eq!(results[0].status, StatusCode::BAD_NOT_READABLE);

        // Local treatments are exempt
        let results = handle_read(
            &CallContext::local_treatment(),
            &space,
            &PermissiveAuthZ,
            &[read_value(node)],
            timestamps::NEITHER,
            100,
            0,
        )
        .unwrap();
        assert_eq!(results[0].status, StatusCode::GOOD);
    }

    #[test]
    fn role_permissions_deny_read() {
        let mut space = MemoryAddressSpace::with_ns0();
        let node = NodeId::string(2, "Restricted");
        space.add_variable(node.clone(), "Restricted", Variant::Int32(1));
        space.set_role_permissions(
            &node,
            vec![RolePermission {
                role: roles::OPERATOR,
                permissions: PermissionSet::read_only(),
            }],
        );

        // Anonymous lacks the operator role
        let results = handle_read(
            &ctx(),
            &space,
            &PermissiveAuthZ,
            &[read_value(node.clone())],
            timestamps::NEITHER,
            100,
            0,
        )
        .unwrap();
        assert_eq!(results[0].status, StatusCode::BAD_USER_ACCESS_DENIED);

        let operator = CallContext {
            user: User {
                username: Some("op".into()),
                roles: vec![roles::OPERATOR],
            },
            ..ctx()
        };
        let results = handle_read(
            &operator,
            &space,
            &PermissiveAuthZ,
            &[read_value(node)],
            timestamps::NEITHER,
            100,
            0,
        )
        .unwrap();
        assert_eq!(results[0].status, StatusCode::GOOD);
    }

    #[test]
    fn timestamp_selection() {
        let space = MemoryAddressSpace::with_ns0();
        let item = read_value(NodeId::numeric(0, ns0::SERVER_STATUS_STATE));

        let results = handle_read(
            &ctx(),
            &space,
            &PermissiveAuthZ,
            &[item.clone()],
            timestamps::SERVER,
            100,
            7,
        )
        .unwrap();
        assert_eq!(results[0].server_timestamp, Some(7));
        assert_eq!(results[0].source_timestamp, None);

        let results = handle_read(
            &ctx(),
            &space,
            &PermissiveAuthZ,
            &[item],
            timestamps::NEITHER,
            100,
            7,
        )
        .unwrap();
        assert_eq!(results[0].server_timestamp, None);
    }

    #[test]
    fn empty_request_faults() {
        let space = MemoryAddressSpace::with_ns0();
        assert_eq!(
            handle_read(
                &ctx(),
                &space,
                &PermissiveAuthZ,
                &[],
                timestamps::BOTH,
                100,
                0
            ),
            Err(StatusCode::BAD_NOTHING_TO_DO)
        );
    }

    #[test]
    fn write_then_read_returns_written_value() {
        use crate::service_write::handle_write;
        use cairn_core::messages::WriteValue;

        let mut space = MemoryAddressSpace::with_ns0();
        let node = NodeId::string(2, "RoundTrip");
        space.add_variable(node.clone(), "RoundTrip", Variant::Double(0.0));

        let item = WriteValue {
            node_id: node.clone(),
            attribute_id: AttributeId::Value as u32,
            index_range: None,
            value: DataValue::new(Variant::Double(2.5)),
        };
        handle_write(&ctx(), &mut space, &PermissiveAuthZ, &[item], 100, 0).unwrap();

        let results = handle_read(
            &ctx(),
            &space,
            &PermissiveAuthZ,
            &[read_value(node)],
            timestamps::NEITHER,
            100,
            0,
        )
        .unwrap();
        assert_eq!(results[0].value, Some(Variant::Double(2.5)));
    }
}
