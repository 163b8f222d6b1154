//! Listening socket setup.
//!
//! The listener is created non-blocking and close-on-exec, with
//! `SO_REUSEADDR` so a crashed server can be restarted on the same port
//! immediately, and with an explicit backlog rather than the platform
//! default.

use std::{io, net::SocketAddr};

use mio::net::TcpListener;
use socket2::{Domain, Protocol, Socket, Type};

/// Default well-known port devices connect to.
pub const DEFAULT_PORT: u16 = 6969;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: i32 = 128;

/// Bind and listen on `addr`.
pub fn bind(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(TcpListener::from_std(socket.into()))
}
