//! The session state machine.
//!
//! A [`Session`] is an owned struct driven by explicit transition methods;
//! the states mirror its life on the wire: created by CreateSession,
//! activated with a user identity, possibly orphaned when its channel dies,
//! re-activated over a new channel, and closed by request or timeout.
//! Channels are referenced only by [`ScId`] — the session table and the
//! channel table never point at each other.

use std::time::{Duration, Instant};

use cairn_core::channel::ScId;
use cairn_core::crypto::AsymmetricSecurity;
use cairn_core::messages::UserIdentityToken;
use cairn_core::status::StatusCode;
use cairn_core::types::NodeId;

use crate::deps::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Creating,
    Created,
    UserActivating,
    Active,
    Closing,
    Closed,
    Orphaned,
}

#[derive(Debug)]
pub struct Session {
    /// Table index, stable for the session's life.
    pub index: u32,
    /// Wire session id returned by CreateSession.
    pub session_id: NodeId,
    /// Server-generated authentication token, opaque to the client.
    pub auth_token: NodeId,
    pub name: String,

    state: SessionState,
    /// The channel this session is bound to. None while orphaned.
    channel: Option<ScId>,
    user: Option<User>,

    pub server_nonce: Vec<u8>,
    pub timeout: Duration,
    last_activity: Instant,
    pub locale_ids: Vec<String>,
}

impl Session {
    pub fn new(
        index: u32,
        session_id: NodeId,
        auth_token: NodeId,
        name: String,
        channel: ScId,
        timeout: Duration,
        now: Instant,
    ) -> Self {
        Session {
            index,
            session_id,
            auth_token,
            name,
            state: SessionState::Creating,
            channel: Some(channel),
            user: None,
            server_nonce: Vec::new(),
            timeout,
            last_activity: now,
            locale_ids: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn channel(&self) -> Option<ScId> {
        self.channel
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Record traffic on the session.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// CreateSession response has been produced.
    pub fn created(&mut self) {
        debug_assert_eq!(self.state, SessionState::Creating);
        self.state = SessionState::Created;
    }

    /// Begin ActivateSession processing. Valid from `Created` (first
    /// activation), `Active` (re-activation with a new user or channel) and
    /// `Orphaned` (re-activation after channel loss).
    pub fn begin_activation(&mut self) -> Result<SessionState, StatusCode> {
        match self.state {
            SessionState::Created | SessionState::Active | SessionState::Orphaned => {
                let previous = self.state;
                self.state = SessionState::UserActivating;
                Ok(previous)
            }
            _ => Err(StatusCode::BAD_SESSION_NOT_ACTIVATED),
        }
    }

    /// Activation succeeded: bind the user and channel.
    pub fn activate(&mut self, user: User, channel: ScId, locales: Vec<String>, now: Instant) {
        debug_assert_eq!(self.state, SessionState::UserActivating);
        if self.channel != Some(channel) {
            tracing::debug!(
                session = self.index,
                old = ?self.channel,
                new = channel,
                "session rebound to a new channel"
            );
        }
        self.user = Some(user);
        self.channel = Some(channel);
        if !locales.is_empty() {
            self.locale_ids = locales;
        }
        self.state = SessionState::Active;
        self.touch(now);
    }

    /// Activation failed: fall back to the state activation started from.
    /// A first activation leaves the session in `Created` so the client may
    /// retry with another identity.
    pub fn fail_activation(&mut self, previous: SessionState) {
        debug_assert_eq!(self.state, SessionState::UserActivating);
        self.state = previous;
    }

    /// The bound channel died. Active sessions survive as orphans until
    /// re-activated on a new channel or timed out.
    pub fn orphan(&mut self) {
        self.channel = None;
        if self.state == SessionState::Active {
            self.state = SessionState::Orphaned;
        } else {
            self.state = SessionState::Closed;
        }
    }

    pub fn begin_close(&mut self) {
        self.state = SessionState::Closing;
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.channel = None;
        self.user = None;
    }

    /// Timeout probe, run on every message and on the periodic tick.
    pub fn timed_out(&self, now: Instant) -> bool {
        matches!(
            self.state,
            SessionState::Created | SessionState::Active | SessionState::Orphaned
        ) && now.duration_since(self.last_activity) > self.timeout
    }
}

// ── User token encryption ─────────────────────────────────────────────────────

/// Client side: prepare an identity token for ActivateSession.
///
/// Anonymous tokens pass through unchanged. UserName passwords are
/// encrypted with the server nonce through the host's asymmetric profile
/// when one is configured; with the null profile the password travels in
/// the clear, which is only sound inside `SignAndEncrypt` channels or test
/// setups. Unsupported token types fail locally.
pub fn encrypt_user_token(
    asym: &dyn AsymmetricSecurity,
    server_certificate: Option<&[u8]>,
    server_nonce: &[u8],
    algorithm_uri: Option<&str>,
    token: UserIdentityToken,
) -> Result<UserIdentityToken, StatusCode> {
    match token {
        UserIdentityToken::Anonymous { .. } => Ok(token),
        UserIdentityToken::UserName {
            policy_id,
            user_name,
            password,
            ..
        } => {
            let Some(algorithm) = algorithm_uri else {
                // No user-token security policy: pass through
                return Ok(UserIdentityToken::UserName {
                    policy_id,
                    user_name,
                    password,
                    encryption_algorithm: None,
                });
            };
            let cert = server_certificate.ok_or(StatusCode::BAD_IDENTITY_TOKEN_REJECTED)?;
            let mut plain = password.unwrap_or_default();
            plain.extend_from_slice(server_nonce);
            let ciphered = asym.encrypt_for(cert, &plain)?;
            Ok(UserIdentityToken::UserName {
                policy_id,
                user_name,
                password: Some(ciphered),
                encryption_algorithm: Some(algorithm.to_string()),
            })
        }
        UserIdentityToken::X509 { .. } => Ok(token),
    }
}

/// Server side: undo [`encrypt_user_token`]. Called exactly once per
/// activation attempt, before authentication.
pub fn decrypt_user_token(
    asym: &dyn AsymmetricSecurity,
    server_nonce: &[u8],
    token: UserIdentityToken,
) -> Result<UserIdentityToken, StatusCode> {
    match token {
        UserIdentityToken::UserName {
            policy_id,
            user_name,
            password,
            encryption_algorithm: Some(_),
        } => {
            let ciphered = password.ok_or(StatusCode::BAD_IDENTITY_TOKEN_INVALID)?;
            let plain = asym
                .decrypt(&ciphered)
                .map_err(|_| StatusCode::BAD_IDENTITY_TOKEN_INVALID)?;
            if plain.len() < server_nonce.len()
                || &plain[plain.len() - server_nonce.len()..] != server_nonce
            {
                return Err(StatusCode::BAD_IDENTITY_TOKEN_INVALID);
            }
            let password = plain[..plain.len() - server_nonce.len()].to_vec();
            Ok(UserIdentityToken::UserName {
                policy_id,
                user_name,
                password: Some(password),
                encryption_algorithm: None,
            })
        }
        other => Ok(other),
    }
}
