//! Connection registry for live devices.
//!
//! The registry owns every live [`Connection`] keyed by [`ConnectionId`].
//! Iteration order is unspecified and nothing depends on it. Removing a
//! connection drops its socket, which closes it.
//!
//! The registry is the single source of truth for round completion: see
//! [`ConnectionRegistry::all_sent`].

use std::collections::HashMap;

use crate::connection::{Connection, ConnectionId};

/// Registry of live connections.
#[derive(Debug)]
pub struct ConnectionRegistry<S> {
    /// Connection ID → connection
    connections: HashMap<ConnectionId, Connection<S>>,
}

impl<S> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ConnectionRegistry<S> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self { connections: HashMap::new() }
    }

    /// Insert a connection.
    ///
    /// Returns `false` (and drops nothing) if the id is already present.
    pub fn add(&mut self, connection: Connection<S>) -> bool {
        let id = connection.id();
        if self.connections.contains_key(&id) {
            return false;
        }

        self.connections.insert(id, connection);
        true
    }

    /// Remove a connection, closing its socket.
    ///
    /// Returns `false` if the connection was not present.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        self.connections.remove(&id).is_some()
    }

    /// Barrier predicate: every live connection has been sent the current
    /// color. Vacuously true when empty.
    pub fn all_sent(&self) -> bool {
        self.connections.values().all(Connection::is_sent)
    }

    /// Number of connections still owed the current color.
    pub fn pending_count(&self) -> usize {
        self.connections.values().filter(|c| !c.is_sent()).count()
    }

    /// Connection by id. `None` if not live.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection<S>> {
        self.connections.get(&id)
    }

    /// Mutable connection by id. `None` if not live.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<S>> {
        self.connections.get_mut(&id)
    }

    /// Check if a connection is live.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// All live connections.
    pub fn iter(&self) -> impl Iterator<Item = &Connection<S>> + '_ {
        self.connections.values()
    }

    /// All live connections, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection<S>> + '_ {
        self.connections.values_mut()
    }

    /// Ids of all live connections.
    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.keys().copied()
    }

    /// Total number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// No live connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
