//! Readiness subscription abstraction.
//!
//! Decouples the broadcast state machine from the OS readiness primitive.
//! Production wraps a `mio::Registry`; simulation records registrations in a
//! table so tests can assert on them directly.

use std::io;

use crate::connection::{ConnectionId, Interest};

/// Readiness subscriptions for sockets of type `S`.
///
/// # Invariants
///
/// Implementations MUST treat these as replace-not-merge operations: after
/// `reregister(.., interest)` the socket is subscribed to `interest` only.
/// Every method is safe to call from inside a handler that is running on
/// behalf of a readiness event, for the same or any other socket.
pub trait Readiness<S> {
    /// Subscribe a socket that is not yet registered.
    fn register(&mut self, socket: &mut S, id: ConnectionId, interest: Interest)
    -> io::Result<()>;

    /// Replace the subscription of a registered socket (and re-arm it).
    fn reregister(
        &mut self,
        socket: &mut S,
        id: ConnectionId,
        interest: Interest,
    ) -> io::Result<()>;

    /// Drop the subscription of a registered socket.
    fn deregister(&mut self, socket: &mut S, id: ConnectionId) -> io::Result<()>;
}

/// Readiness reported for one connection in one wait.
///
/// Error and hang-up conditions are folded into both flags by the runtime so
/// the next I/O attempt surfaces the underlying error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ready {
    /// A read would not block.
    pub readable: bool,
    /// A write would not block.
    pub writable: bool,
}

impl Ready {
    /// Readable only.
    pub const READABLE: Self = Self { readable: true, writable: false };
    /// Writable only.
    pub const WRITABLE: Self = Self { readable: false, writable: true };
    /// Both, as reported for errors and hang-ups.
    pub const ALL: Self = Self { readable: true, writable: true };

    /// Whether this readiness satisfies the given interest.
    pub fn satisfies(self, interest: Interest) -> bool {
        match interest {
            Interest::Read => self.readable,
            Interest::Write => self.writable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satisfies_matches_interest() {
        assert!(Ready::READABLE.satisfies(Interest::Read));
        assert!(!Ready::READABLE.satisfies(Interest::Write));
        assert!(Ready::WRITABLE.satisfies(Interest::Write));
        assert!(!Ready::WRITABLE.satisfies(Interest::Read));
        assert!(Ready::ALL.satisfies(Interest::Read) && Ready::ALL.satisfies(Interest::Write));
        assert!(!Ready::default().satisfies(Interest::Read));
    }
}
