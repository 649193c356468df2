//! Role-permission authorization.
//!
//! Answers one question: may this user perform this operation on this node
//! attribute? The basic [`crate::deps::UserAuthZ`] layer is consulted first;
//! if it grants access, role permissions (node-scoped, else the namespace
//! default, else nothing) are merged additively over the user's roles.
//! Evaluation is pure — nothing here mutates the address space.

use cairn_core::status::StatusCode;
use cairn_core::types::{AttributeId, NodeId};

use crate::address_space::{AddressSpace, RolePermission};
use crate::deps::{OperationType, User, UserAuthZ};

/// A bitfield over the OPC UA PermissionType flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermissionSet(pub u32);

impl PermissionSet {
    pub const NONE: PermissionSet = PermissionSet(0);
    pub const BROWSE: PermissionSet = PermissionSet(1 << 0);
    pub const READ_ROLE_PERMISSIONS: PermissionSet = PermissionSet(1 << 1);
    pub const WRITE_ATTRIBUTE: PermissionSet = PermissionSet(1 << 2);
    pub const WRITE_ROLE_PERMISSIONS: PermissionSet = PermissionSet(1 << 3);
    pub const WRITE_HISTORIZING: PermissionSet = PermissionSet(1 << 4);
    pub const READ: PermissionSet = PermissionSet(1 << 5);
    pub const WRITE: PermissionSet = PermissionSet(1 << 6);
    pub const READ_HISTORY: PermissionSet = PermissionSet(1 << 7);
    pub const INSERT_HISTORY: PermissionSet = PermissionSet(1 << 8);
    pub const MODIFY_HISTORY: PermissionSet = PermissionSet(1 << 9);
    pub const DELETE_HISTORY: PermissionSet = PermissionSet(1 << 10);
    pub const RECEIVE_EVENTS: PermissionSet = PermissionSet(1 << 11);
    pub const CALL: PermissionSet = PermissionSet(1 << 12);
    pub const ADD_REFERENCE: PermissionSet = PermissionSet(1 << 13);
    pub const REMOVE_REFERENCE: PermissionSet = PermissionSet(1 << 14);
    pub const DELETE_NODE: PermissionSet = PermissionSet(1 << 15);
    pub const ADD_NODE: PermissionSet = PermissionSet(1 << 16);

    pub const fn union(self, other: PermissionSet) -> PermissionSet {
        PermissionSet(self.0 | other.0)
    }

    pub const fn contains(self, other: PermissionSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Everything a trusted operator may do on this server's data plane.
    pub const fn read_write() -> PermissionSet {
        PermissionSet::BROWSE
            .union(PermissionSet::READ)
            .union(PermissionSet::WRITE)
            .union(PermissionSet::CALL)
            .union(PermissionSet::RECEIVE_EVENTS)
    }

    pub const fn read_only() -> PermissionSet {
        PermissionSet::BROWSE
            .union(PermissionSet::READ)
            .union(PermissionSet::RECEIVE_EVENTS)
    }
}

impl OperationType {
    /// The permission bit an operation needs.
    pub fn required_permission(self) -> PermissionSet {
        match self {
            OperationType::Read => PermissionSet::READ,
            OperationType::Write => PermissionSet::WRITE,
            OperationType::Browse => PermissionSet::BROWSE,
            OperationType::Call => PermissionSet::CALL,
            OperationType::ReceiveEvents => PermissionSet::RECEIVE_EVENTS,
            OperationType::AddNode => PermissionSet::ADD_NODE,
        }
    }

    /// The status an operation surfaces when authorization denies it.
    pub fn denial_status(self) -> StatusCode {
        match self {
            OperationType::Read => StatusCode::BAD_NOT_READABLE,
            OperationType::Write => StatusCode::BAD_NOT_WRITABLE,
            _ => StatusCode::BAD_USER_ACCESS_DENIED,
        }
    }
}

/// The role permissions applying to a node: its own list, else the
/// namespace default, else nothing.
fn role_permissions_or_default(
    space: &dyn AddressSpace,
    node: &NodeId,
) -> Option<Vec<RolePermission>> {
    space
        .role_permissions(node)
        .or_else(|| space.default_role_permissions(node.namespace))
}

/// Merge the permissions granted to any of the user's roles. Purely
/// additive; a role that does not appear grants nothing.
fn merge_user_permissions(user: &User, role_permissions: &[RolePermission]) -> PermissionSet {
    let mut merged = PermissionSet::NONE;
    for role in &user.roles {
        for grant in role_permissions {
            if &grant.role == role {
                merged = merged.union(grant.permissions);
            }
        }
    }
    merged
}

/// The full authorization decision for one operation.
///
/// Local service treatments bypass this entirely — callers pass
/// `local = true` and get an unconditional grant.
pub fn is_authorized(
    local: bool,
    authz: &dyn UserAuthZ,
    space: &dyn AddressSpace,
    user: &User,
    operation: OperationType,
    node: &NodeId,
    attribute: AttributeId,
) -> bool {
    if local {
        return true;
    }
    if !authz.is_authorized(user, operation, node, attribute) {
        return false;
    }
    let Some(role_permissions) = role_permissions_or_default(space, node) else {
        // No role permissions anywhere: the basic layer alone decides
        return true;
    };
    let granted = merge_user_permissions(user, &role_permissions);
    granted.contains(operation.required_permission())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::MemoryAddressSpace;
    use crate::deps::{roles, PermissiveAuthZ};
    use cairn_core::types::Variant;

    struct DenyAll;

    impl UserAuthZ for DenyAll {
        fn is_authorized(
            &self,
            _user: &User,
            _operation: OperationType,
            _node: &NodeId,
            _attribute: AttributeId,
        ) -> bool {
            false
        }
    }

    fn operator() -> User {
        User {
            username: Some("op".into()),
            roles: vec![roles::AUTHENTICATED_USER, roles::OPERATOR],
        }
    }

    fn space_with_node(perms: Option<Vec<RolePermission>>) -> (MemoryAddressSpace, NodeId) {
        let mut space = MemoryAddressSpace::with_ns0();
        let node = NodeId::string(2, "Demo");
        space.add_variable(node.clone(), "Demo", Variant::Int32(1));
        if let Some(perms) = perms {
            space.set_role_permissions(&node, perms);
        }
        (space, node)
    }

    #[test]
    fn local_treatment_bypasses_everything() {
        let (space, node) = space_with_node(None);
        assert!(is_authorized(
            true,
            &DenyAll,
            &space,
            &User::anonymous(),
            OperationType::Write,
            &node,
            AttributeId::Value,
        ));
    }

    #[test]
    fn basic_layer_denial_is_final() {
        let (space, node) = space_with_node(None);
        assert!(!is_authorized(
            false,
            &DenyAll,
            &space,
            &operator(),
            OperationType::Read,
            &node,
            AttributeId::Value,
        ));
    }

    #[test]
    fn no_role_permissions_falls_back_to_basic() {
        let (space, node) = space_with_node(None);
        assert!(is_authorized(
            false,
            &PermissiveAuthZ,
            &space,
            &User::anonymous(),
            OperationType::Write,
            &node,
            AttributeId::Value,
        ));
    }

    #[test]
    fn role_permissions_merge_additively() {
        let perms = vec![
            RolePermission {
                role: roles::AUTHENTICATED_USER,
                permissions: PermissionSet::read_only(),
            },
            RolePermission {
                role: roles::OPERATOR,
                permissions: PermissionSet::WRITE,
            },
        ];
        let (space, node) = space_with_node(Some(perms));

        // Operator holds both roles: read from one grant, write from the other
        assert!(is_authorized(
            false,
            &PermissiveAuthZ,
            &space,
            &operator(),
            OperationType::Write,
            &node,
            AttributeId::Value,
        ));
        // Anonymous holds neither granted role
        assert!(!is_authorized(
            false,
            &PermissiveAuthZ,
            &space,
            &User::anonymous(),
            OperationType::Read,
            &node,
            AttributeId::Value,
        ));
    }

    #[test]
    fn namespace_default_applies_without_node_permissions() {
        let (mut space, node) = space_with_node(None);
        space.set_default_role_permissions(
            2,
            vec![RolePermission {
                role: roles::ANONYMOUS,
                permissions: PermissionSet::read_only(),
            }],
        );
        assert!(is_authorized(
            false,
            &PermissiveAuthZ,
            &space,
            &User::anonymous(),
            OperationType::Read,
            &node,
            AttributeId::Value,
        ));
        assert!(!is_authorized(
            false,
            &PermissiveAuthZ,
            &space,
            &User::anonymous(),
            OperationType::Write,
            &node,
            AttributeId::Value,
        ));
    }

    #[test]
    fn evaluation_is_repeatable() {
        let (space, node) = space_with_node(Some(vec![RolePermission {
            role: roles::OPERATOR,
            permissions: PermissionSet::read_write(),
        }]));
        let user = operator();
        let first = is_authorized(
            false,
            &PermissiveAuthZ,
            &space,
            &user,
            OperationType::Write,
            &node,
            AttributeId::Value,
        );
        for _ in 0..10 {
            assert_eq!(
                is_authorized(
                    false,
                    &PermissiveAuthZ,
                    &space,
                    &user,
                    OperationType::Write,
                    &node,
                    AttributeId::Value,
                ),
                first
            );
        }
    }
}
