//! mio-backed readiness subscriptions.
//!
//! Maps core [`Interest`] onto `mio::Interest` and [`ConnectionId`] onto
//! `mio::Token`. Token 0 is the listener.

use std::io;

use mio::{Registry, Token, event::Event, net::TcpStream};
use unison_core::{ConnectionId, Interest, Readiness, Ready};

/// Token the listening socket is registered under.
pub const LISTENER: Token = Token(ConnectionId::LISTENER.get() as usize);

/// Token for a connection.
pub fn token(id: ConnectionId) -> Token {
    Token(id.get() as usize)
}

/// Connection for a token.
pub fn connection_id(token: Token) -> ConnectionId {
    ConnectionId::new(token.0 as u64)
}

fn mio_interest(interest: Interest) -> mio::Interest {
    match interest {
        Interest::Read => mio::Interest::READABLE,
        Interest::Write => mio::Interest::WRITABLE,
    }
}

/// Readiness from a mio event.
///
/// Errors and hang-ups are reported as both readable and writable so
/// whichever handler the connection is registered for runs and observes the
/// failure on its next I/O call.
pub fn ready(event: &Event) -> Ready {
    let failed = event.is_error();
    Ready {
        readable: event.is_readable() || event.is_read_closed() || failed,
        writable: event.is_writable() || event.is_write_closed() || failed,
    }
}

/// [`Readiness`] over a `mio::Registry`.
pub struct MioReadiness<'a> {
    registry: &'a Registry,
}

impl<'a> MioReadiness<'a> {
    /// Wrap a registry borrowed from the reactor's `Poll`.
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }
}

impl Readiness<TcpStream> for MioReadiness<'_> {
    fn register(
        &mut self,
        socket: &mut TcpStream,
        id: ConnectionId,
        interest: Interest,
    ) -> io::Result<()> {
        self.registry.register(socket, token(id), mio_interest(interest))
    }

    fn reregister(
        &mut self,
        socket: &mut TcpStream,
        id: ConnectionId,
        interest: Interest,
    ) -> io::Result<()> {
        self.registry.reregister(socket, token(id), mio_interest(interest))
    }

    fn deregister(&mut self, socket: &mut TcpStream, _id: ConnectionId) -> io::Result<()> {
        self.registry.deregister(socket)
    }
}
