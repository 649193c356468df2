//! Host dependency seams.
//!
//! Everything the protocol engine cannot decide by itself arrives through
//! these traits: who a user is, what they may do, what time it is, and how
//! methods are executed. The address space seam lives in
//! [`crate::address_space`]; PKI and asymmetric crypto live in
//! `cairn_core::crypto`.

use std::time::Instant;

use cairn_core::channel::ScId;
use cairn_core::messages::UserIdentityToken;
use cairn_core::status::StatusCode;
use cairn_core::types::{AttributeId, NodeId, Variant};

/// Well-known ns=0 role nodes.
pub mod roles {
    use cairn_core::types::NodeId;

    pub const ANONYMOUS: NodeId = NodeId::numeric(0, 15644);
    pub const AUTHENTICATED_USER: NodeId = NodeId::numeric(0, 15656);
    pub const OBSERVER: NodeId = NodeId::numeric(0, 15668);
    pub const OPERATOR: NodeId = NodeId::numeric(0, 15680);
}

/// An authenticated user and the roles their session holds.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// None for the anonymous user.
    pub username: Option<String>,
    pub roles: Vec<NodeId>,
}

impl User {
    pub fn anonymous() -> Self {
        User {
            username: None,
            roles: vec![roles::ANONYMOUS],
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }
}

/// The explicit call context handed to every service handler.
///
/// Carries who is asking and over which channel/session; `local` marks a
/// request originated by the server's own application, which bypasses
/// access-level and authorization checks.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub channel: Option<ScId>,
    pub session: Option<u32>,
    pub user: User,
    pub locales: Vec<String>,
    pub local: bool,
}

impl CallContext {
    /// Context for a local service treatment.
    pub fn local_treatment() -> Self {
        CallContext {
            channel: None,
            session: None,
            user: User::anonymous(),
            locales: Vec::new(),
            local: true,
        }
    }
}

/// The operation an authorization question is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Read,
    Write,
    Browse,
    Call,
    ReceiveEvents,
    AddNode,
}

/// User authentication, injected by the host.
pub trait UserAuthN: Send + Sync {
    /// Validate an identity token presented on ActivateSession.
    ///
    /// Token decryption has already happened; passwords arrive in the clear.
    fn validate_token(
        &self,
        endpoint_url: &str,
        token: &UserIdentityToken,
    ) -> Result<User, StatusCode>;
}

/// Coarse per-user authorization, evaluated before role permissions.
pub trait UserAuthZ: Send + Sync {
    fn is_authorized(
        &self,
        user: &User,
        operation: OperationType,
        node: &NodeId,
        attribute: AttributeId,
    ) -> bool;
}

/// Method invocation, injected by the host.
pub trait MethodCallManager: Send + Sync {
    fn invoke(
        &self,
        object: &NodeId,
        method: &NodeId,
        input_arguments: &[Variant],
        caller: &User,
    ) -> (StatusCode, Vec<Variant>);
}

/// Time, injected so the engine never consults the system clock directly.
pub trait Clock: Send + Sync {
    fn monotonic_now(&self) -> Instant;
    /// UTC now as OPC UA DateTime ticks.
    fn utc_now(&self) -> i64;
}

/// The host-facing default clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> i64 {
        let unix_millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        cairn_core::types::ticks_from_unix_millis(unix_millis)
    }
}

/// A method manager that knows no methods.
pub struct NoMethods;

impl MethodCallManager for NoMethods {
    fn invoke(
        &self,
        _object: &NodeId,
        method: &NodeId,
        _input_arguments: &[Variant],
        _caller: &User,
    ) -> (StatusCode, Vec<Variant>) {
        tracing::debug!(method = %method, "method invocation with no call manager");
        (StatusCode::BAD_METHOD_INVALID, Vec::new())
    }
}

/// An authorization layer that grants everything. Role permissions still
/// apply on top of it.
pub struct PermissiveAuthZ;

impl UserAuthZ for PermissiveAuthZ {
    fn is_authorized(
        &self,
        _user: &User,
        _operation: OperationType,
        _node: &NodeId,
        _attribute: AttributeId,
    ) -> bool {
        true
    }
}

// ── Static user registry ──────────────────────────────────────────────────────

struct UserEntry {
    password: String,
    roles: Vec<NodeId>,
}

/// Username/password authentication backed by an in-memory table, plus
/// optional anonymous access. The demo server loads this from its config
/// file; production hosts bring their own [`UserAuthN`].
pub struct StaticUserRegistry {
    allow_anonymous: bool,
    anonymous_roles: Vec<NodeId>,
    users: std::collections::HashMap<String, UserEntry>,
}

impl StaticUserRegistry {
    pub fn new(allow_anonymous: bool) -> Self {
        StaticUserRegistry {
            allow_anonymous,
            anonymous_roles: vec![roles::ANONYMOUS],
            users: std::collections::HashMap::new(),
        }
    }

    pub fn add_user(
        &mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        user_roles: Vec<NodeId>,
    ) {
        let mut all_roles = vec![roles::AUTHENTICATED_USER];
        all_roles.extend(user_roles);
        self.users.insert(
            username.into(),
            UserEntry {
                password: password.into(),
                roles: all_roles,
            },
        );
    }
}

impl UserAuthN for StaticUserRegistry {
    fn validate_token(
        &self,
        _endpoint_url: &str,
        token: &UserIdentityToken,
    ) -> Result<User, StatusCode> {
        match token {
            UserIdentityToken::Anonymous { .. } => {
                if self.allow_anonymous {
                    Ok(User {
                        username: None,
                        roles: self.anonymous_roles.clone(),
                    })
                } else {
                    Err(StatusCode::BAD_IDENTITY_TOKEN_REJECTED)
                }
            }
            UserIdentityToken::UserName {
                user_name,
                password,
                ..
            } => {
                let name = user_name
                    .as_deref()
                    .ok_or(StatusCode::BAD_IDENTITY_TOKEN_INVALID)?;
                let entry = self
                    .users
                    .get(name)
                    .ok_or(StatusCode::BAD_IDENTITY_TOKEN_REJECTED)?;
                let supplied = password.as_deref().unwrap_or_default();
                if supplied == entry.password.as_bytes() {
                    Ok(User {
                        username: Some(name.to_string()),
                        roles: entry.roles.clone(),
                    })
                } else {
                    tracing::warn!(user = name, "password rejected");
                    Err(StatusCode::BAD_IDENTITY_TOKEN_REJECTED)
                }
            }
            // Certificate identities need a host-provided validator
            UserIdentityToken::X509 { .. } => Err(StatusCode::BAD_IDENTITY_TOKEN_REJECTED),
        }
    }
}
