//! Host session table.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::HostSession;

/// Read-only snapshot of a host session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Client address (table key).
    pub address: String,
    /// Authenticated identity, if the handshake got that far.
    pub identity: Option<String>,
    /// Self-reported client IP (not verified).
    pub client_ip: Option<String>,
    /// When the session was created.
    pub created_at: Instant,
    /// Last handshake or application message.
    pub last_message_at: Instant,
    /// Last heartbeat.
    pub last_heartbeat_at: Option<Instant>,
    /// Messages received.
    pub message_count: u64,
    /// Heartbeats received.
    pub heartbeat_count: u64,
    /// Whether a cipher is installed.
    pub established: bool,
}

/// Sessions keyed by client address.
///
/// Owned by a single router task; entries are plain data and the table is
/// their only owner.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<String, HostSession>,
}

impl SessionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Session for `address`, created if absent.
    pub fn get_or_insert(&mut self, address: &str, now: Instant) -> &mut HostSession {
        self.sessions
            .entry(address.to_string())
            .or_insert_with(|| HostSession::new(address, now))
    }

    /// Session for `address`.
    pub fn get(&self, address: &str) -> Option<&HostSession> {
        self.sessions.get(address)
    }

    /// Mutable session for `address`.
    pub fn get_mut(&mut self, address: &str) -> Option<&mut HostSession> {
        self.sessions.get_mut(address)
    }

    /// Remove the session for `address`.
    pub fn remove(&mut self, address: &str) -> Option<HostSession> {
        self.sessions.remove(address)
    }

    /// Current session keys.
    pub fn keys(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Evict every session idle for longer than `timeout` as of `now`.
    ///
    /// Returns the evicted addresses. Retained sessions are not modified.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut evicted = Vec::new();
        self.sessions.retain(|address, session| {
            let keep = now.saturating_duration_since(session.last_touched()) <= timeout;
            if !keep {
                evicted.push(address.clone());
            }
            keep
        });
        evicted
    }
}
