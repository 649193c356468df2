//! The server session table.
//!
//! Owns every [`Session`] and the lookup from the wire authentication token.
//! Channel loss, timeout sweeps and close requests all funnel through here
//! so that a session leaves the table in exactly one way.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use cairn_core::channel::ScId;
use cairn_core::config::ServerConfig;
use cairn_core::crypto::generate_nonce;
use cairn_core::status::StatusCode;
use cairn_core::types::NodeId;

use crate::session::{Session, SessionState};

/// Length of the opaque authentication token identifier.
const AUTH_TOKEN_BYTES: usize = 32;

/// Length of the server nonce returned by CreateSession / ActivateSession.
const SESSION_NONCE_BYTES: usize = 32;

pub struct SessionManager {
    sessions: HashMap<u32, Session>,
    by_auth_token: HashMap<NodeId, u32>,
    next_index: u32,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(config: &ServerConfig) -> Self {
        SessionManager {
            sessions: HashMap::new(),
            by_auth_token: HashMap::new(),
            next_index: 1,
            max_sessions: config.max_sessions as usize,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Create a session bound to `channel`. Returns the new session index.
    pub fn create(
        &mut self,
        channel: ScId,
        name: Option<&str>,
        timeout: Duration,
        now: Instant,
    ) -> Result<u32, StatusCode> {
        if self.sessions.len() >= self.max_sessions {
            return Err(StatusCode::BAD_TOO_MANY_SESSIONS);
        }
        let index = self.next_index;
        self.next_index = self.next_index.wrapping_add(1).max(1);

        let session_id = NodeId::numeric(1, index);
        let auth_token = NodeId::opaque(0, generate_nonce(AUTH_TOKEN_BYTES));
        let mut session = Session::new(
            index,
            session_id,
            auth_token.clone(),
            name.unwrap_or("").to_string(),
            channel,
            timeout,
            now,
        );
        session.server_nonce = generate_nonce(SESSION_NONCE_BYTES);
        session.created();

        self.by_auth_token.insert(auth_token, index);
        self.sessions.insert(index, session);
        tracing::info!(session = index, channel, "session created");
        Ok(index)
    }

    pub fn get(&self, index: u32) -> Option<&Session> {
        self.sessions.get(&index)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut Session> {
        self.sessions.get_mut(&index)
    }

    /// Resolve the session a request addresses via its authentication token.
    pub fn resolve_token(&self, auth_token: &NodeId) -> Option<u32> {
        self.by_auth_token.get(auth_token).copied()
    }

    pub fn resolve_token_mut(&mut self, auth_token: &NodeId) -> Option<&mut Session> {
        let index = *self.by_auth_token.get(auth_token)?;
        self.sessions.get_mut(&index)
    }

    /// Rotate the server nonce ahead of an activation round.
    pub fn rotate_nonce(&mut self, index: u32) -> Vec<u8> {
        let nonce = generate_nonce(SESSION_NONCE_BYTES);
        if let Some(session) = self.sessions.get_mut(&index) {
            session.server_nonce = nonce.clone();
        }
        nonce
    }

    /// Does any session currently bind this channel?
    pub fn channel_has_sessions(&self, channel: ScId) -> bool {
        self.sessions
            .values()
            .any(|s| s.channel() == Some(channel))
    }

    /// The channel died: orphan its activated sessions, close the rest.
    /// Returns the indices that became orphans.
    pub fn on_channel_lost(&mut self, channel: ScId) -> Vec<u32> {
        let mut orphaned = Vec::new();
        let mut closed = Vec::new();
        for session in self.sessions.values_mut() {
            if session.channel() == Some(channel) {
                session.orphan();
                match session.state() {
                    SessionState::Orphaned => orphaned.push(session.index),
                    _ => closed.push(session.index),
                }
            }
        }
        for index in closed {
            self.remove(index);
        }
        if !orphaned.is_empty() {
            tracing::info!(channel, sessions = ?orphaned, "sessions orphaned by channel loss");
        }
        orphaned
    }

    /// Close a session and drop it from the table.
    pub fn close(&mut self, index: u32) {
        if let Some(session) = self.sessions.get_mut(&index) {
            session.close();
        }
        self.remove(index);
    }

    /// Timeout sweep. Returns the sessions that expired this tick.
    pub fn tick(&mut self, now: Instant) -> Vec<u32> {
        let expired: Vec<u32> = self
            .sessions
            .values()
            .filter(|s| s.timed_out(now))
            .map(|s| s.index)
            .collect();
        for &index in &expired {
            tracing::info!(session = index, "session timed out");
            self.close(index);
        }
        expired
    }

    fn remove(&mut self, index: u32) {
        if let Some(session) = self.sessions.remove(&index) {
            self.by_auth_token.remove(&session.auth_token);
            tracing::debug!(session = index, "session removed");
        }
    }
}
