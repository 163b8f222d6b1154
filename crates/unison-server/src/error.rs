//! Server error types.

use std::{fmt, io, net::SocketAddr};

use unison_core::BroadcastError;

use crate::privsep::PrivsepError;

/// Errors that terminate the server.
///
/// There is no recovery path for any of these: the process logs the error
/// and exits non-zero. Restarting is the supervisor's job.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (unusable flag combination, unsupported platform).
    Config(String),

    /// Creating, binding or listening on the listening socket failed.
    Bind {
        /// Requested listen address
        addr: SocketAddr,
        /// Underlying OS error
        source: io::Error,
    },

    /// The readiness primitive failed (create, register, wait).
    Poll(io::Error),

    /// Accepting a connection failed with a non-transient error.
    Accept(io::Error),

    /// Privilege separation bootstrap failed.
    ///
    /// Always raised before any client traffic is served.
    Privsep(PrivsepError),

    /// The broadcast state machine hit an infrastructure failure.
    Broadcast(BroadcastError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Bind { addr, source } => write!(f, "cannot listen on {addr}: {source}"),
            Self::Poll(err) => write!(f, "readiness poll failed: {err}"),
            Self::Accept(err) => write!(f, "accept failed: {err}"),
            Self::Privsep(err) => write!(f, "privilege separation failed: {err}"),
            Self::Broadcast(err) => write!(f, "broadcast failed: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind { source, .. } => Some(source),
            Self::Poll(err) | Self::Accept(err) => Some(err),
            Self::Privsep(err) => Some(err),
            Self::Broadcast(err) => Some(err),
            Self::Config(_) => None,
        }
    }
}

impl From<PrivsepError> for ServerError {
    fn from(err: PrivsepError) -> Self {
        Self::Privsep(err)
    }
}

impl From<BroadcastError> for ServerError {
    fn from(err: BroadcastError) -> Self {
        Self::Broadcast(err)
    }
}
