//! Single-threaded readiness reactor.
//!
//! Owns the `mio::Poll`, the listening socket and the [`Broadcaster`]. Each
//! [`Reactor::turn`] waits for one batch of readiness events and dispatches
//! them in order: listener events drain the accept queue, connection events
//! go to [`Broadcaster::handle_ready`], which routes by the connection's
//! current registration. Nothing here blocks except the wait itself.

use std::{convert::Infallible, io, net::SocketAddr, time::Duration};

use mio::{
    Events, Poll, Token,
    net::{TcpListener, TcpStream},
};
use unison_core::{BroadcastConfig, Broadcaster, Ready};

use crate::{
    error::ServerError,
    readiness::{self, LISTENER, MioReadiness},
};

/// Default number of readiness events collected per wait.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Reactor configuration.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Readiness events collected per wait
    pub event_capacity: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self { event_capacity: DEFAULT_EVENT_CAPACITY }
    }
}

/// The event loop.
pub struct Reactor {
    poll: Poll,
    events: Events,
    /// Event tokens copied out of `events`, reused across turns
    batch: Vec<(Token, Ready)>,
    listener: TcpListener,
    broadcaster: Broadcaster<TcpStream>,
}

impl Reactor {
    /// Create the readiness instance and subscribe the listener.
    pub fn new(
        mut listener: TcpListener,
        config: &ReactorConfig,
        broadcast: BroadcastConfig,
    ) -> Result<Self, ServerError> {
        let poll = Poll::new().map_err(ServerError::Poll)?;
        poll.registry()
            .register(&mut listener, LISTENER, mio::Interest::READABLE)
            .map_err(ServerError::Poll)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(config.event_capacity),
            batch: Vec::with_capacity(config.event_capacity),
            listener,
            broadcaster: Broadcaster::new(broadcast),
        })
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Poll)
    }

    /// Broadcast state, for inspection.
    pub fn broadcaster(&self) -> &Broadcaster<TcpStream> {
        &self.broadcaster
    }

    /// Run forever. Only returns on a fatal error.
    pub fn run(&mut self) -> Result<Infallible, ServerError> {
        loop {
            self.turn(None)?;
        }
    }

    /// Wait for one batch of readiness (up to `timeout`) and dispatch it.
    ///
    /// Returns the number of events dispatched.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<usize, ServerError> {
        if let Err(err) = self.poll.poll(&mut self.events, timeout) {
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(ServerError::Poll(err));
        }

        let mut batch = std::mem::take(&mut self.batch);
        batch.clear();
        batch.extend(self.events.iter().map(|event| (event.token(), readiness::ready(event))));

        let result = self.dispatch(&batch);
        let dispatched = batch.len();
        self.batch = batch;
        result.map(|()| dispatched)
    }

    fn dispatch(&mut self, batch: &[(Token, Ready)]) -> Result<(), ServerError> {
        for &(token, ready) in batch {
            if token == LISTENER {
                self.accept_ready()?;
                continue;
            }

            let mut readiness = MioReadiness::new(self.poll.registry());
            self.broadcaster.handle_ready(readiness::connection_id(token), ready, &mut readiness)?;
        }
        Ok(())
    }

    /// Drain the accept queue. Each socket is admitted on its own, so every
    /// newcomer forces (or joins) a SENDING round.
    fn accept_ready(&mut self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let mut readiness = MioReadiness::new(self.poll.registry());
                    let id = self.broadcaster.accept(stream, &mut readiness)?;
                    tracing::debug!(conn = %id, %peer, "peer address");
                },
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::Interrupted
                            | io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    tracing::warn!(error = %err, "transient accept error");
                },
                Err(err) => return Err(ServerError::Accept(err)),
            }
        }
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("mode", &self.broadcaster.mode())
            .field("color", &self.broadcaster.color())
            .field("connection_count", &self.broadcaster.connection_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::TcpStream as StdStream,
        time::Instant,
    };

    use unison_core::Mode;

    use super::*;
    use crate::listener;

    fn pump_until(reactor: &mut Reactor, mut done: impl FnMut(&Reactor) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(reactor) {
            assert!(Instant::now() < deadline, "timed out: {reactor:?}");
            reactor.turn(Some(Duration::from_millis(10))).unwrap();
        }
    }

    #[test]
    fn batch_buffer_is_reused_across_turns() {
        let config = ReactorConfig { event_capacity: 8 };
        let listener = listener::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let mut reactor = Reactor::new(listener, &config, BroadcastConfig::default()).unwrap();
        let buffer = reactor.batch.as_ptr();
        assert_eq!(reactor.batch.capacity(), 8);

        let mut device = StdStream::connect(reactor.local_addr().unwrap()).unwrap();
        device.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        pump_until(&mut reactor, |r| {
            r.broadcaster().connection_count() == 1 && r.broadcaster().mode() == Mode::Receiving
        });

        for color in 2..6u8 {
            device.write_all(&[color]).unwrap();
            let rounds = reactor.broadcaster().rounds_completed();
            pump_until(&mut reactor, |r| r.broadcaster().rounds_completed() > rounds);
        }

        let mut received = [0u8; 5];
        device.read_exact(&mut received).unwrap();
        assert_eq!(received, [1, 2, 3, 4, 5]);
        assert_eq!(reactor.batch.as_ptr(), buffer);
        assert_eq!(reactor.batch.capacity(), 8);
    }
}
