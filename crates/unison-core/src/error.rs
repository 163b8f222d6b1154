//! Error types for the broadcast core.
//!
//! Connection-scoped failures (a device hanging up or resetting) never become
//! errors: the handler tears that connection down and carries on. What is
//! left here is infrastructure failure, which the process does not attempt
//! to recover from.

use std::io;

use thiserror::Error;

use crate::connection::ConnectionId;

/// Fatal errors raised while driving the broadcast state machine.
#[derive(Error, Debug)]
pub enum BroadcastError {
    /// Readiness registration primitive failed.
    #[error("readiness {op} failed for connection {id}: {source}")]
    Readiness {
        /// Connection being (re/de)registered
        id: ConnectionId,
        /// `register`, `reregister` or `deregister`
        op: &'static str,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Socket I/O failed with an error that is neither transient nor a peer
    /// disconnect.
    #[error("{op} failed on connection {id}: {source}")]
    Io {
        /// Connection the operation ran on
        id: ConnectionId,
        /// `read` or `write`
        op: &'static str,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },
}

impl BroadcastError {
    /// Connection the failing operation ran on.
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Self::Readiness { id, .. } | Self::Io { id, .. } => *id,
        }
    }
}

/// What a connection-scoped I/O error means for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Try again on the next readiness signal.
    Retry,
    /// The peer is gone; tear the connection down.
    PeerGone,
    /// Not a per-connection condition; terminate the process.
    Fatal,
}

/// Classify a socket I/O error.
pub fn classify(err: &io::Error) -> Disposition {
    use io::ErrorKind;

    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::Interrupted => Disposition::Retry,
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof
        | ErrorKind::TimedOut
        | ErrorKind::HostUnreachable
        | ErrorKind::NetworkUnreachable
        | ErrorKind::NetworkDown => Disposition::PeerGone,
        _ => Disposition::Fatal,
    }
}
