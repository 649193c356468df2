//! Server and client configuration.
//!
//! All configuration flows through these structs, built explicitly by the
//! host and passed at initialisation. The core never reads the environment
//! or the filesystem; `cairnd` translates its TOML file into a
//! [`ServerConfig`], other hosts build one in code.

use serde::{Deserialize, Serialize};

use crate::channel::TransportLimits;
use crate::crypto::{SecurityMode, SecurityPolicy};

/// A (policy, mode) pair the server exposes as an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub policy: SecurityPolicy,
    pub mode: SecurityMode,
}

/// The kind of user identity token an endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserTokenKind {
    Anonymous,
    UserName,
    X509,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTokenPolicyConfig {
    /// Policy id echoed by clients in their identity token.
    pub policy_id: String,
    pub kind: UserTokenKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub application_uri: String,
    pub product_uri: String,
    pub application_name: String,
    /// The endpoint URL clients ask for, `opc.tcp://host:port/path`.
    pub endpoint_url: String,

    /// Security configurations this server's endpoint offers.
    pub security: Vec<SecurityConfig>,
    pub user_token_policies: Vec<UserTokenPolicyConfig>,

    // Transport
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,

    // Tables
    pub max_channels: u32,
    pub max_sessions: u32,

    // Sessions
    pub min_session_timeout_ms: f64,
    pub max_session_timeout_ms: f64,

    // Services
    pub max_operations_per_request: u32,
    pub max_references_per_browse_node: u32,

    // Subscriptions
    pub max_subscriptions_per_session: u32,
    pub max_publish_requests_per_session: u32,
    pub max_notifications_queued: u32,
    pub retransmission_queue_size: u32,
    pub min_publishing_interval_ms: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            application_uri: "urn:cairn:server".into(),
            product_uri: "urn:cairn".into(),
            application_name: "cairn server".into(),
            endpoint_url: "opc.tcp://localhost:4840/cairn".into(),
            security: vec![SecurityConfig {
                policy: SecurityPolicy::None,
                mode: SecurityMode::None,
            }],
            user_token_policies: vec![
                UserTokenPolicyConfig {
                    policy_id: "anonymous".into(),
                    kind: UserTokenKind::Anonymous,
                },
                UserTokenPolicyConfig {
                    policy_id: "username".into(),
                    kind: UserTokenKind::UserName,
                },
            ],
            receive_buffer_size: 65_535,
            send_buffer_size: 65_535,
            max_message_size: 16 * 1024 * 1024,
            max_chunk_count: 64,
            max_channels: 64,
            max_sessions: 128,
            min_session_timeout_ms: 1_000.0,
            max_session_timeout_ms: 600_000.0,
            max_operations_per_request: 1_000,
            max_references_per_browse_node: 1_000,
            max_subscriptions_per_session: 16,
            max_publish_requests_per_session: 16,
            max_notifications_queued: 1_024,
            retransmission_queue_size: 32,
            min_publishing_interval_ms: 50.0,
        }
    }
}

impl ServerConfig {
    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = url.into();
        self
    }

    pub fn with_security(mut self, security: Vec<SecurityConfig>) -> Self {
        self.security = security;
        self
    }

    pub fn transport_limits(&self) -> TransportLimits {
        TransportLimits {
            receive_buffer_size: self.receive_buffer_size,
            send_buffer_size: self.send_buffer_size,
            max_message_size: self.max_message_size,
            max_chunk_count: self.max_chunk_count,
        }
    }

    /// Clamp a requested session timeout into the configured band.
    pub fn clamp_session_timeout(&self, requested_ms: f64) -> f64 {
        if !requested_ms.is_finite() || requested_ms <= 0.0 {
            return self.max_session_timeout_ms;
        }
        requested_ms.clamp(self.min_session_timeout_ms, self.max_session_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub application_uri: String,
    pub application_name: String,
    pub endpoint_url: String,

    pub security_policy: SecurityPolicy,
    pub security_mode: SecurityMode,

    /// Requested secure channel token lifetime.
    pub channel_lifetime_ms: u32,
    /// Requested session timeout.
    pub session_timeout_ms: f64,
    /// Per-request deadline applied by the client engine.
    pub request_timeout_ms: u64,
    pub session_name: String,
    pub locale_ids: Vec<String>,

    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            application_uri: "urn:cairn:client".into(),
            application_name: "cairn client".into(),
            endpoint_url: "opc.tcp://localhost:4840/cairn".into(),
            security_policy: SecurityPolicy::None,
            security_mode: SecurityMode::None,
            channel_lifetime_ms: 3_600_000,
            session_timeout_ms: 60_000.0,
            request_timeout_ms: 10_000,
            session_name: "cairn session".into(),
            locale_ids: vec!["en".into()],
            receive_buffer_size: 65_535,
            send_buffer_size: 65_535,
            max_message_size: 16 * 1024 * 1024,
            max_chunk_count: 64,
        }
    }
}

impl ClientConfig {
    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = url.into();
        self
    }

    pub fn with_session_timeout_ms(mut self, timeout_ms: f64) -> Self {
        self.session_timeout_ms = timeout_ms;
        self
    }

    pub fn transport_limits(&self) -> TransportLimits {
        TransportLimits {
            receive_buffer_size: self.receive_buffer_size,
            send_buffer_size: self.send_buffer_size,
            max_message_size: self.max_message_size,
            max_chunk_count: self.max_chunk_count,
        }
    }
}
