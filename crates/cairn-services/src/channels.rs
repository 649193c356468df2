//! The channel manager.
//!
//! A bounded table of live secure channels, keyed by [`ScId`]. The actual
//! framing state machines live with the secure-channel task; this table is
//! the services-side view — which channels exist, which socket backs them,
//! when they last carried traffic — and the admission policy for new server
//! connections.

use std::collections::HashMap;
use std::time::Instant;

use cairn_core::channel::ScId;

/// Opaque socket handle as assigned by the sockets task.
pub type SocketId = u64;

#[derive(Debug, Clone)]
pub struct ChannelEntry {
    pub sc_id: ScId,
    pub socket: SocketId,
    pub connected_at: Instant,
    pub last_activity: Instant,
    lost: bool,
}

/// What to do with an incoming connection when the table is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// At capacity, but this idle session-less channel may be closed first.
    EvictThenAccept(ScId),
    /// At capacity and every channel carries a session.
    Reject,
}

pub struct ChannelManager {
    channels: HashMap<ScId, ChannelEntry>,
    capacity: usize,
}

impl ChannelManager {
    pub fn new(capacity: usize) -> Self {
        ChannelManager {
            channels: HashMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Decide whether a new connection fits. `has_session` reports whether a
    /// channel currently carries any session; channels with sessions are
    /// never auto-closed.
    pub fn admit(&self, has_session: impl Fn(ScId) -> bool) -> Admission {
        if self.channels.len() < self.capacity {
            return Admission::Accept;
        }
        let oldest_idle = self
            .channels
            .values()
            .filter(|entry| !has_session(entry.sc_id))
            .min_by_key(|entry| entry.last_activity)
            .map(|entry| entry.sc_id);
        match oldest_idle {
            Some(sc_id) => Admission::EvictThenAccept(sc_id),
            None => Admission::Reject,
        }
    }

    /// Bind a socket to a channel id at connection time.
    pub fn register(&mut self, sc_id: ScId, socket: SocketId, now: Instant) {
        self.channels.insert(
            sc_id,
            ChannelEntry {
                sc_id,
                socket,
                connected_at: now,
                last_activity: now,
                lost: false,
            },
        );
        tracing::debug!(sc_id, socket, "channel registered");
    }

    pub fn get(&self, sc_id: ScId) -> Option<&ChannelEntry> {
        self.channels.get(&sc_id)
    }

    pub fn socket_of(&self, sc_id: ScId) -> Option<SocketId> {
        self.channels.get(&sc_id).map(|e| e.socket)
    }

    pub fn touch(&mut self, sc_id: ScId, now: Instant) {
        if let Some(entry) = self.channels.get_mut(&sc_id) {
            entry.last_activity = now;
        }
    }

    /// Mark a channel lost. Returns true only the first time, so `ScLost`
    /// is surfaced exactly once per channel.
    pub fn mark_lost(&mut self, sc_id: ScId) -> bool {
        match self.channels.get_mut(&sc_id) {
            Some(entry) if !entry.lost => {
                entry.lost = true;
                tracing::info!(sc_id, "secure channel lost");
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, sc_id: ScId) {
        self.channels.remove(&sc_id);
    }

    /// Iterate over channels that are still connected.
    pub fn iter_connected(&self) -> impl Iterator<Item = &ChannelEntry> {
        self.channels.values().filter(|entry| !entry.lost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manager(capacity: usize) -> ChannelManager {
        ChannelManager::new(capacity)
    }

    #[test]
    fn register_and_lookup() {
        let now = Instant::now();
        let mut mgr = manager(4);
        mgr.register(1, 900, now);
        assert_eq!(mgr.socket_of(1), Some(900));
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn mark_lost_fires_once() {
        let now = Instant::now();
        let mut mgr = manager(4);
        mgr.register(1, 900, now);
        assert!(mgr.mark_lost(1));
        assert!(!mgr.mark_lost(1));
        assert!(!mgr.mark_lost(999));
    }

    #[test]
    fn admission_below_capacity() {
        let mgr = manager(2);
        assert_eq!(mgr.admit(|_| false), Admission::Accept);
    }

    #[test]
    fn admission_evicts_oldest_idle_channel() {
        let now = Instant::now();
        let mut mgr = manager(2);
        let (a, b) = (1, 2);
        mgr.register(a, 1, now);
        mgr.register(b, 2, now);
        mgr.touch(a, now + Duration::from_secs(5));

        // b is the least recently active and has no session
        assert_eq!(mgr.admit(|_| false), Admission::EvictThenAccept(b));
        // a busy channel is spared: only b has a session, so a is evictable
        assert_eq!(mgr.admit(|id| id == b), Admission::EvictThenAccept(a));
        // every channel carries a session: reject
        assert_eq!(mgr.admit(|_| true), Admission::Reject);
    }

    #[test]
    fn iter_connected_skips_lost() {
        let now = Instant::now();
        let mut mgr = manager(4);
        let (a, b) = (1, 2);
        mgr.register(a, 1, now);
        mgr.register(b, 2, now);
        mgr.mark_lost(a);
        let alive: Vec<ScId> = mgr.iter_connected().map(|e| e.sc_id).collect();
        assert_eq!(alive, vec![b]);
    }
}
