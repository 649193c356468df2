//! GetEndpoints, Browse and Call.
//!
//! The smaller service handlers: endpoint discovery straight out of the
//! server configuration, reference browsing over the address-space seam,
//! and method invocation through the host's call manager.

use cairn_core::config::{ServerConfig, UserTokenKind};
use cairn_core::messages::{
    browse_direction, user_token_type, ApplicationDescription, BrowseDescription, BrowseResult,
    CallMethodRequest, CallMethodResult, EndpointDescription, ReferenceDescription,
    UserTokenPolicy,
};
use cairn_core::status::StatusCode;
use cairn_core::types::{AttributeId, LocalizedText, NodeId};

use crate::address_space::{AddressSpace, NodeClass};
use crate::authorization::is_authorized;
use crate::deps::{CallContext, MethodCallManager, OperationType, UserAuthZ};

const TRANSPORT_PROFILE_BINARY: &str =
    "http://opcfoundation.org/UA-Profile/Transport/uatcp-uasc-uabinary";

// ── GetEndpoints ──────────────────────────────────────────────────────────────

/// The endpoint descriptions this server advertises, derived from its
/// configuration. Also returned inside CreateSession responses.
pub fn build_endpoints(config: &ServerConfig) -> Vec<EndpointDescription> {
    let server = ApplicationDescription {
        application_uri: Some(config.application_uri.clone()),
        product_uri: Some(config.product_uri.clone()),
        application_name: LocalizedText::new(config.application_name.clone()),
        application_type: 0, // server
        gateway_server_uri: None,
        discovery_profile_uri: None,
        discovery_urls: Some(vec![Some(config.endpoint_url.clone())]),
    };
    let user_identity_tokens: Vec<UserTokenPolicy> = config
        .user_token_policies
        .iter()
        .map(|policy| UserTokenPolicy {
            policy_id: Some(policy.policy_id.clone()),
            token_type: match policy.kind {
                UserTokenKind::Anonymous => user_token_type::ANONYMOUS,
                UserTokenKind::UserName => user_token_type::USER_NAME,
                UserTokenKind::X509 => user_token_type::CERTIFICATE,
            },
            issued_token_type: None,
            issuer_endpoint_url: None,
            security_policy_uri: None,
        })
        .collect();

    config
        .security
        .iter()
        .map(|security| EndpointDescription {
            endpoint_url: Some(config.endpoint_url.clone()),
            server: server.clone(),
            server_certificate: None,
            security_mode: security.mode as u32,
            security_policy_uri: Some(security.policy.uri().to_string()),
            user_identity_tokens: Some(user_identity_tokens.clone()),
            transport_profile_uri: Some(TRANSPORT_PROFILE_BINARY.to_string()),
            security_level: security.mode as u8,
        })
        .collect()
}

// ── Browse ────────────────────────────────────────────────────────────────────

/// Process the descriptions of a Browse request.
pub fn handle_browse(
    ctx: &CallContext,
    space: &dyn AddressSpace,
    authz: &dyn UserAuthZ,
    view_id: &NodeId,
    requested_max_references: u32,
    nodes_to_browse: &[BrowseDescription],
    config: &ServerConfig,
) -> Result<Vec<BrowseResult>, StatusCode> {
    if nodes_to_browse.is_empty() {
        return Err(StatusCode::BAD_NOTHING_TO_DO);
    }
    if nodes_to_browse.len() > config.max_operations_per_request as usize {
        return Err(StatusCode::BAD_TOO_MANY_OPERATIONS);
    }
    // Views are not implemented; only the null view browses the full space
    if !view_id.is_null() {
        return Err(StatusCode::BAD_VIEW_ID_UNKNOWN);
    }

    let cap = match requested_max_references {
        0 => config.max_references_per_browse_node as usize,
        n => (n as usize).min(config.max_references_per_browse_node as usize),
    };

    Ok(nodes_to_browse
        .iter()
        .map(|description| browse_one(ctx, space, authz, description, cap))
        .collect())
}

fn browse_one(
    ctx: &CallContext,
    space: &dyn AddressSpace,
    authz: &dyn UserAuthZ,
    description: &BrowseDescription,
    cap: usize,
) -> BrowseResult {
    let fail = |status: StatusCode| BrowseResult {
        status_code: status,
        continuation_point: None,
        references: None,
    };

    if description.browse_direction > browse_direction::BOTH {
        return fail(StatusCode::BAD_BROWSE_DIRECTION_INVALID);
    }
    if space.node_class(&description.node_id).is_none() {
        return fail(StatusCode::BAD_NODE_ID_UNKNOWN);
    }
    if !ctx.local
        && !is_authorized(
            false,
            authz,
            space,
            &ctx.user,
            OperationType::Browse,
            &description.node_id,
            AttributeId::BrowseName,
        )
    {
        return fail(StatusCode::BAD_USER_ACCESS_DENIED);
    }

    let filter_type = if description.reference_type_id.is_null() {
        None
    } else {
        Some(&description.reference_type_id)
    };

    let references: Vec<ReferenceDescription> = space
        .iterate_references(&description.node_id)
        .into_iter()
        .filter(|reference| match description.browse_direction {
            browse_direction::FORWARD => reference.is_forward,
            browse_direction::INVERSE => !reference.is_forward,
            _ => true,
        })
        .filter(|reference| match filter_type {
            None => true,
            Some(wanted) if description.include_subtypes => {
                space.is_type_subtype_of(&reference.reference_type, wanted)
            }
            Some(wanted) => &reference.reference_type == wanted,
        })
        .filter(|reference| {
            description.node_class_mask == 0
                || description.node_class_mask & reference.target_class as u32 != 0
        })
        .take(cap)
        .map(|reference| ReferenceDescription {
            reference_type_id: reference.reference_type,
            is_forward: reference.is_forward,
            node_id: reference.target,
            browse_name: reference.browse_name,
            display_name: reference.display_name,
            node_class: reference.target_class as u32,
            type_definition: reference.type_definition,
        })
        .collect();

    BrowseResult {
        status_code: StatusCode::GOOD,
        continuation_point: None,
        references: Some(references),
    }
}

// ── Call ──────────────────────────────────────────────────────────────────────

/// Process the method invocations of a Call request.
pub fn handle_call(
    ctx: &CallContext,
    space: &dyn AddressSpace,
    authz: &dyn UserAuthZ,
    methods: &dyn MethodCallManager,
    methods_to_call: &[CallMethodRequest],
    max_operations: usize,
) -> Result<Vec<CallMethodResult>, StatusCode> {
    if methods_to_call.is_empty() {
        return Err(StatusCode::BAD_NOTHING_TO_DO);
    }
    if methods_to_call.len() > max_operations {
        return Err(StatusCode::BAD_TOO_MANY_OPERATIONS);
    }

    Ok(methods_to_call
        .iter()
        .map(|call| call_one(ctx, space, authz, methods, call))
        .collect())
}

fn call_one(
    ctx: &CallContext,
    space: &dyn AddressSpace,
    authz: &dyn UserAuthZ,
    methods: &dyn MethodCallManager,
    call: &CallMethodRequest,
) -> CallMethodResult {
    let fail = |status: StatusCode| CallMethodResult {
        status_code: status,
        input_argument_results: None,
        input_argument_diagnostic_infos: None,
        output_arguments: None,
    };

    if space.node_class(&call.object_id).is_none() {
        return fail(StatusCode::BAD_NODE_ID_UNKNOWN);
    }
    match space.node_class(&call.method_id) {
        Some(NodeClass::Method) => {}
        _ => return fail(StatusCode::BAD_METHOD_INVALID),
    }
    if !ctx.local
        && !is_authorized(
            false,
            authz,
            space,
            &ctx.user,
            OperationType::Call,
            &call.method_id,
            AttributeId::Executable,
        )
    {
        return fail(StatusCode::BAD_USER_ACCESS_DENIED);
    }

    let args = call.input_arguments.as_deref().unwrap_or_default();
    let (status, output) = methods.invoke(&call.object_id, &call.method_id, args, &ctx.user);
    CallMethodResult {
        status_code: status,
        input_argument_results: None,
        input_argument_diagnostic_infos: None,
        output_arguments: if output.is_empty() {
            None
        } else {
            Some(output)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::{ns0, MemoryAddressSpace};
    use crate::deps::{PermissiveAuthZ, User, NoMethods};
    use cairn_core::types::Variant;

    fn ctx() -> CallContext {
        CallContext {
            channel: Some(1),
            session: Some(1),
            user: User::anonymous(),
            locales: vec![],
            local: false,
        }
    }

    fn describe(node: NodeId) -> BrowseDescription {
        BrowseDescription {
            node_id: node,
            browse_direction: browse_direction::FORWARD,
            reference_type_id: NodeId::null(),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: 0x3F,
        }
    }

    #[test]
    fn endpoints_reflect_config() {
        let config = ServerConfig::default();
        let endpoints = build_endpoints(&config);
        assert_eq!(endpoints.len(), config.security.len());
        assert_eq!(endpoints[0].endpoint_url.as_deref(), Some("opc.tcp://localhost:4840/cairn"));
        let tokens = endpoints[0].user_identity_tokens.as_ref().unwrap();
        assert!(tokens.iter().any(|t| t.token_type == user_token_type::ANONYMOUS));
        assert!(tokens.iter().any(|t| t.token_type == user_token_type::USER_NAME));
    }

    #[test]
    fn browse_server_finds_status() {
        let space = MemoryAddressSpace::with_ns0();
        let config = ServerConfig::default();
        let results = handle_browse(
            &ctx(),
            &space,
            &PermissiveAuthZ,
            &NodeId::null(),
            0,
            &[describe(NodeId::numeric(0, ns0::SERVER))],
            &config,
        )
        .unwrap();
        assert_eq!(results[0].status_code, StatusCode::GOOD);
        let refs = results[0].references.as_ref().unwrap();
        assert!(refs
            .iter()
            .any(|r| r.node_id.node_id == NodeId::numeric(0, ns0::SERVER_STATUS)));
    }

    #[test]
    fn browse_filters_by_reference_type_with_subtypes() {
        let space = MemoryAddressSpace::with_ns0();
        let config = ServerConfig::default();
        // HierarchicalReferences covers Organizes via subtype
        let mut description = describe(NodeId::numeric(0, ns0::OBJECTS_FOLDER));
        description.reference_type_id = NodeId::numeric(0, ns0::HIERARCHICAL_REFERENCES);
        let results = handle_browse(
            &ctx(),
            &space,
            &PermissiveAuthZ,
            &NodeId::null(),
            0,
            &[description.clone()],
            &config,
        )
        .unwrap();
        assert!(!results[0].references.as_ref().unwrap().is_empty());

        // Exact matching excludes it
        description.include_subtypes = false;
        let results = handle_browse(
            &ctx(),
            &space,
            &PermissiveAuthZ,
            &NodeId::null(),
            0,
            &[description],
            &config,
        )
        .unwrap();
        assert!(results[0].references.as_ref().unwrap().is_empty());
    }

    #[test]
    fn browse_inverse_direction() {
        let space = MemoryAddressSpace::with_ns0();
        let config = ServerConfig::default();
        let mut description = describe(NodeId::numeric(0, ns0::SERVER_STATUS));
        description.browse_direction = browse_direction::INVERSE;
        let results = handle_browse(
            &ctx(),
            &space,
            &PermissiveAuthZ,
            &NodeId::null(),
            0,
            &[description],
            &config,
        )
        .unwrap();
        let refs = results[0].references.as_ref().unwrap();
        assert!(refs
            .iter()
            .all(|r| !r.is_forward));
        assert!(refs
            .iter()
            .any(|r| r.node_id.node_id == NodeId::numeric(0, ns0::SERVER)));
    }

    #[test]
    fn browse_unknown_node_and_bad_direction() {
        let space = MemoryAddressSpace::with_ns0();
        let config = ServerConfig::default();
        let mut bad_direction = describe(NodeId::numeric(0, ns0::SERVER));
        bad_direction.browse_direction = 7;
        let results = handle_browse(
            &ctx(),
            &space,
            &PermissiveAuthZ,
            &NodeId::null(),
            0,
            &[describe(NodeId::string(9, "nope")), bad_direction],
            &config,
        )
        .unwrap();
        assert_eq!(results[0].status_code, StatusCode::BAD_NODE_ID_UNKNOWN);
        assert_eq!(results[1].status_code, StatusCode::BAD_BROWSE_DIRECTION_INVALID);
    }

    #[test]
    fn browse_truncates_at_requested_max() {
        let mut space = MemoryAddressSpace::with_ns0();
        let hub = NodeId::string(2, "Hub");
        space.add_object(hub.clone(), "Hub");
        for i in 0..10 {
            let child = NodeId::string(2, format!("Child{i}"));
            space.add_variable(child.clone(), &format!("Child{i}"), Variant::Int32(i));
            space.add_reference(&hub, NodeId::numeric(0, ns0::HAS_COMPONENT), &child);
        }
        let config = ServerConfig::default();
        let results = handle_browse(
            &ctx(),
            &space,
            &PermissiveAuthZ,
            &NodeId::null(),
            3,
            &[describe(hub)],
            &config,
        )
        .unwrap();
        assert_eq!(results[0].references.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn unknown_view_faults() {
        let space = MemoryAddressSpace::with_ns0();
        let config = ServerConfig::default();
        assert_eq!(
            handle_browse(
                &ctx(),
                &space,
                &PermissiveAuthZ,
                &NodeId::numeric(2, 99),
                0,
                &[describe(NodeId::numeric(0, ns0::SERVER))],
                &config,
            ),
            Err(StatusCode::BAD_VIEW_ID_UNKNOWN)
        );
    }

    #[test]
    fn call_validates_object_and_method() {
        let mut space = MemoryAddressSpace::with_ns0();
        space.add_method(NodeId::string(2, "Reset"), "Reset");
        let results = handle_call(
            &ctx(),
            &space,
            &PermissiveAuthZ,
            &NoMethods,
            &[
                CallMethodRequest {
                    object_id: NodeId::string(9, "ghost"),
                    method_id: NodeId::string(2, "Reset"),
                    input_arguments: None,
                },
                CallMethodRequest {
                    object_id: NodeId::numeric(0, ns0::SERVER),
                    method_id: NodeId::numeric(0, ns0::SERVER_STATUS), // not a method
                    input_arguments: None,
                },
                CallMethodRequest {
                    object_id: NodeId::numeric(0, ns0::SERVER),
                    method_id: NodeId::string(2, "Reset"),
                    input_arguments: None,
                },
            ],
            100,
        )
        .unwrap();
        assert_eq!(results[0].status_code, StatusCode::BAD_NODE_ID_UNKNOWN);
        assert_eq!(results[1].status_code, StatusCode::BAD_METHOD_INVALID);
        // NoMethods refuses the structurally valid call
        assert_eq!(results[2].status_code, StatusCode::BAD_METHOD_INVALID);
    }
}
