//! Per-device connection state.
//!
//! A [`Connection`] owns one device's socket together with the readiness
//! interest it is currently registered for and whether it has already been
//! sent the color of the current round. The socket type is generic so the
//! same state machine runs over mio sockets in production and in-memory
//! sockets in simulation.

use std::fmt;

/// Identity of a live connection. Doubles as its readiness token.
///
/// Id 0 is reserved for the listening socket and never assigned to a
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Token value reserved for the listener.
    pub const LISTENER: Self = Self(0);

    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The one readiness condition a live connection waits for.
///
/// There is no "both" or "none": a live connection is always
/// registered for exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    /// Wake when a byte can be read.
    Read,
    /// Wake when a byte can be written.
    Write,
}

/// One device's TCP session.
#[derive(Debug)]
pub struct Connection<S> {
    id: ConnectionId,
    socket: S,
    interest: Interest,
    /// Whether this connection has received the color of the current round
    sent: bool,
}

impl<S> Connection<S> {
    /// Create a connection that has not yet been sent anything.
    pub fn new(id: ConnectionId, socket: S, interest: Interest) -> Self {
        debug_assert_ne!(id, ConnectionId::LISTENER);
        Self { id, socket, interest, sent: false }
    }

    /// Connection identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Interest the connection is currently registered for.
    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// Record a new registration. Callers must keep the OS registration in
    /// step.
    pub fn set_interest(&mut self, interest: Interest) {
        self.interest = interest;
    }

    /// Whether the current round's color has been delivered here.
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Mark the current round's color as delivered.
    pub fn mark_sent(&mut self) {
        self.sent = true;
    }

    /// Start a new round for this connection.
    pub fn clear_sent(&mut self) {
        self.sent = false;
    }

    /// Underlying socket.
    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// Underlying socket, mutably (for I/O and registration).
    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }
}
