//! Registry of live sessions.
//!
//! The server keeps a handle to every running session so `stop()` can ask
//! each one to close.

use slab::Slab;

use crate::session::Connection;

/// Live connection handles keyed by slab index.
///
/// Provides O(1) insert, lookup, and remove operations.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Slab<Connection>,
}

impl SessionRegistry {
    /// Create a registry with room for `capacity` sessions before reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sessions: Slab::with_capacity(capacity),
        }
    }

    /// Register a session, returning its key.
    pub fn insert(&mut self, conn: Connection) -> usize {
        self.sessions.insert(conn)
    }

    /// Remove a session by key.
    pub fn remove(&mut self, key: usize) -> Option<Connection> {
        self.sessions.try_remove(key)
    }

    pub fn get(&self, key: usize) -> Option<&Connection> {
        self.sessions.get(key)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Clone out every handle, so callers can act without holding a lock.
    pub fn snapshot(&self) -> Vec<Connection> {
        self.sessions.iter().map(|(_, conn)| conn.clone()).collect()
    }
}
