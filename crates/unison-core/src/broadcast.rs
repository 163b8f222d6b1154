//! Broadcast/barrier state machine.
//!
//! Holds the shared [`Color`], the global [`Mode`] and the registry of live
//! connections, and runs the per-connection I/O handlers. Every entry point
//! takes the [`Readiness`] implementation by `&mut` so handlers can re-register
//! any connection, including the one whose event is being handled.
//!
//! # Rounds
//!
//! ```text
//!   Receiving ──(byte read | connection accepted)──> Sending
//!   Sending   ──(all live connections sent)────────> Receiving
//! ```
//!
//! Entering `Sending` clears every `sent` flag and flips every connection to
//! write interest. Entering the mode the machine is already in is a no-op, so
//! a connection accepted mid-round joins the round in flight without
//! disturbing it. A connection torn down mid-round is dropped from the
//! barrier.

use std::io::{self, Read, Write};

use crate::{
    color::{Color, Mode},
    connection::{Connection, ConnectionId, Interest},
    error::{BroadcastError, Disposition, classify},
    readiness::{Readiness, Ready},
    registry::ConnectionRegistry,
};

/// State machine configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastConfig {
    /// Color broadcast to devices before anyone proposes one.
    pub initial_color: Color,
}

/// What a readiness dispatch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A color byte was read and a round started.
    Proposed(Color),
    /// The current color was written to the connection.
    Delivered {
        /// This delivery satisfied the barrier.
        round_complete: bool,
    },
    /// The socket was not ready after all; interest was re-armed.
    WouldBlock,
    /// The connection hung up or failed and was torn down.
    Closed,
    /// The event did not match the connection's current registration, the
    /// connection is gone, or it was already served this round.
    Ignored,
}

/// The coordination state machine.
#[derive(Debug)]
pub struct Broadcaster<S> {
    registry: ConnectionRegistry<S>,
    mode: Mode,
    color: Color,
    /// Next id to hand out; 0 belongs to the listener
    next_id: u64,
    rounds_completed: u64,
}

impl<S> Broadcaster<S> {
    /// Create a state machine in [`Mode::Receiving`] with no connections.
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            mode: Mode::Receiving,
            color: config.initial_color,
            next_id: ConnectionId::LISTENER.get() + 1,
            rounds_completed: 0,
        }
    }

    /// Current global mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Current shared color.
    pub fn color(&self) -> Color {
        self.color
    }

    /// Number of SENDING → RECEIVING transitions that re-armed every
    /// connection.
    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed
    }

    /// Live connections.
    pub fn registry(&self) -> &ConnectionRegistry<S> {
        &self.registry
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Admit a freshly accepted socket.
    ///
    /// Forces [`Mode::Sending`] *before* inserting, so a join during
    /// `Receiving` re-sends the current color to every existing device, and a
    /// join during `Sending` joins the round in flight.
    pub fn accept<R: Readiness<S>>(
        &mut self,
        socket: S,
        readiness: &mut R,
    ) -> Result<ConnectionId, BroadcastError> {
        self.enter_mode(Mode::Sending, readiness)?;

        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;

        let interest = self.mode.interest();
        let mut conn = Connection::new(id, socket, interest);
        readiness
            .register(conn.socket_mut(), id, interest)
            .map_err(|source| BroadcastError::Readiness { id, op: "register", source })?;

        let inserted = self.registry.add(conn);
        debug_assert!(inserted, "connection ids are never reused");

        tracing::info!(conn = %id, connections = self.registry.len(), "accepted connection");
        Ok(id)
    }

    /// Switch the global mode.
    ///
    /// No-op when `mode` is already current. Otherwise every connection is
    /// re-registered for the new mode's interest, and its `sent` flag is
    /// cleared when entering [`Mode::Sending`].
    pub fn enter_mode<R: Readiness<S>>(
        &mut self,
        mode: Mode,
        readiness: &mut R,
    ) -> Result<(), BroadcastError> {
        if mode == self.mode {
            return Ok(());
        }

        let previous = self.mode;
        self.mode = mode;

        tracing::debug!(from = ?previous, to = ?mode, "changed mode");

        let interest = mode.interest();
        for conn in self.registry.iter_mut() {
            if mode == Mode::Sending {
                conn.clear_sent();
            }
            conn.set_interest(interest);

            let id = conn.id();
            readiness
                .reregister(conn.socket_mut(), id, interest)
                .map_err(|source| BroadcastError::Readiness { id, op: "reregister", source })?;
        }

        if previous == Mode::Sending {
            self.rounds_completed += 1;
            tracing::info!(
                round = self.rounds_completed,
                color = %self.color,
                connections = self.registry.len(),
                "round complete"
            );
        }

        Ok(())
    }

    /// Remove a connection, close its socket, and re-check the barrier over
    /// the remaining members.
    ///
    /// Returns `false` if the connection was already gone.
    pub fn teardown<R: Readiness<S>>(
        &mut self,
        id: ConnectionId,
        readiness: &mut R,
    ) -> Result<bool, BroadcastError> {
        let Some(conn) = self.registry.get_mut(id) else {
            return Ok(false);
        };

        readiness
            .deregister(conn.socket_mut(), id)
            .map_err(|source| BroadcastError::Readiness { id, op: "deregister", source })?;
        self.registry.remove(id);

        tracing::info!(conn = %id, remaining = self.registry.len(), "tore down connection");

        if self.mode == Mode::Sending && self.registry.all_sent() {
            self.enter_mode(Mode::Receiving, readiness)?;
        }

        Ok(true)
    }

    fn rearm<R: Readiness<S>>(
        &mut self,
        id: ConnectionId,
        interest: Interest,
        readiness: &mut R,
    ) -> Result<(), BroadcastError> {
        let Some(conn) = self.registry.get_mut(id) else {
            return Ok(());
        };

        readiness
            .reregister(conn.socket_mut(), id, interest)
            .map_err(|source| BroadcastError::Readiness { id, op: "reregister", source })
    }

    fn handle_io_error<R: Readiness<S>>(
        &mut self,
        id: ConnectionId,
        op: &'static str,
        interest: Interest,
        err: io::Error,
        readiness: &mut R,
    ) -> Result<Outcome, BroadcastError> {
        match classify(&err) {
            Disposition::Retry => {
                tracing::debug!(conn = %id, op, "would block");
                self.rearm(id, interest, readiness)?;
                Ok(Outcome::WouldBlock)
            },
            Disposition::PeerGone => {
                tracing::info!(conn = %id, op, error = %err, "connection failed");
                self.teardown(id, readiness)?;
                Ok(Outcome::Closed)
            },
            Disposition::Fatal => Err(BroadcastError::Io { id, op, source: err }),
        }
    }
}

impl<S: Read + Write> Broadcaster<S> {
    /// Dispatch one readiness report for a connection.
    ///
    /// Routes by the connection's *current* registration, not by what the
    /// report says: a report that no longer matches (because an earlier
    /// event in the same batch flipped the mode) is ignored, as is one for a
    /// connection torn down earlier in the batch. This is what keeps reads
    /// from happening while the machine is sending.
    pub fn handle_ready<R: Readiness<S>>(
        &mut self,
        id: ConnectionId,
        ready: Ready,
        readiness: &mut R,
    ) -> Result<Outcome, BroadcastError> {
        let Some(conn) = self.registry.get(id) else {
            tracing::trace!(conn = %id, "readiness for departed connection");
            return Ok(Outcome::Ignored);
        };

        let interest = conn.interest();
        debug_assert_eq!(interest, self.mode.interest());

        if !ready.satisfies(interest) {
            tracing::trace!(conn = %id, ?ready, ?interest, "stale readiness");
            return Ok(Outcome::Ignored);
        }

        match interest {
            Interest::Read => self.on_readable(id, readiness),
            Interest::Write => self.on_writable(id, readiness),
        }
    }

    /// Read at most one color byte.
    fn on_readable<R: Readiness<S>>(
        &mut self,
        id: ConnectionId,
        readiness: &mut R,
    ) -> Result<Outcome, BroadcastError> {
        let Some(conn) = self.registry.get_mut(id) else {
            return Ok(Outcome::Ignored);
        };

        let mut byte = [0u8; 1];
        let result = conn.socket_mut().read(&mut byte);

        match result {
            Ok(0) => {
                tracing::info!(conn = %id, "peer closed connection");
                self.teardown(id, readiness)?;
                Ok(Outcome::Closed)
            },
            Ok(_) => {
                let color = Color::new(byte[0]);
                tracing::info!(conn = %id, %color, "received new color");

                self.color = color;
                self.enter_mode(Mode::Sending, readiness)?;
                Ok(Outcome::Proposed(color))
            },
            Err(err) => self.handle_io_error(id, "read", Interest::Read, err, readiness),
        }
    }

    /// Write the current color once per round.
    fn on_writable<R: Readiness<S>>(
        &mut self,
        id: ConnectionId,
        readiness: &mut R,
    ) -> Result<Outcome, BroadcastError> {
        let color = self.color;
        let Some(conn) = self.registry.get_mut(id) else {
            return Ok(Outcome::Ignored);
        };

        if conn.is_sent() {
            tracing::trace!(conn = %id, "already delivered this round");
            return Ok(Outcome::Ignored);
        }

        let result = conn.socket_mut().write(&[color.as_byte()]);

        match result {
            Ok(0) => {
                tracing::info!(conn = %id, "short write");
                self.teardown(id, readiness)?;
                Ok(Outcome::Closed)
            },
            Ok(_) => {
                conn.mark_sent();
                tracing::trace!(conn = %id, %color, "sent color");

                let round_complete = self.registry.all_sent();
                if round_complete {
                    self.enter_mode(Mode::Receiving, readiness)?;
                }
                Ok(Outcome::Delivered { round_complete })
            },
            Err(err) => self.handle_io_error(id, "write", Interest::Write, err, readiness),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        collections::{HashMap, VecDeque},
        io::ErrorKind,
        rc::Rc,
    };

    use super::*;

    #[derive(Default)]
    struct Wire {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
        eof: bool,
        error: Option<ErrorKind>,
    }

    struct TestSocket(Rc<RefCell<Wire>>);

    impl Read for TestSocket {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut wire = self.0.borrow_mut();
            if let Some(kind) = wire.error {
                return Err(kind.into());
            }
            match wire.inbound.pop_front() {
                Some(byte) => {
                    buf[0] = byte;
                    Ok(1)
                },
                None if wire.eof => Ok(0),
                None => Err(ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for TestSocket {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut wire = self.0.borrow_mut();
            if let Some(kind) = wire.error {
                return Err(kind.into());
            }
            wire.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestReadiness {
        registered: HashMap<ConnectionId, Interest>,
        fail: bool,
    }

    impl Readiness<TestSocket> for TestReadiness {
        fn register(
            &mut self,
            _socket: &mut TestSocket,
            id: ConnectionId,
            interest: Interest,
        ) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::other("epoll_ctl failed"));
            }
            assert!(self.registered.insert(id, interest).is_none());
            Ok(())
        }

        fn reregister(
            &mut self,
            _socket: &mut TestSocket,
            id: ConnectionId,
            interest: Interest,
        ) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::other("epoll_ctl failed"));
            }
            assert!(self.registered.insert(id, interest).is_some());
            Ok(())
        }

        fn deregister(&mut self, _socket: &mut TestSocket, id: ConnectionId) -> io::Result<()> {
            assert!(self.registered.remove(&id).is_some());
            Ok(())
        }
    }

    fn connect(
        b: &mut Broadcaster<TestSocket>,
        r: &mut TestReadiness,
    ) -> (ConnectionId, Rc<RefCell<Wire>>) {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let id = b.accept(TestSocket(Rc::clone(&wire)), r).unwrap();
        (id, wire)
    }

    #[test]
    fn starts_receiving_with_configured_color() {
        let b = Broadcaster::<TestSocket>::new(BroadcastConfig { initial_color: Color::BLUE });

        assert_eq!(b.mode(), Mode::Receiving);
        assert_eq!(b.color(), Color::BLUE);
        assert_eq!(b.connection_count(), 0);
        assert_eq!(b.rounds_completed(), 0);
    }

    #[test]
    fn accept_enters_sending_and_registers_for_write() {
        let mut b = Broadcaster::new(BroadcastConfig::default());
        let mut r = TestReadiness::default();

        let (id, _) = connect(&mut b, &mut r);

        assert_ne!(id, ConnectionId::LISTENER);
        assert_eq!(b.mode(), Mode::Sending);
        assert_eq!(r.registered[&id], Interest::Write);
    }

    #[test]
    fn lone_device_receives_initial_color_and_round_closes() {
        let mut b = Broadcaster::new(BroadcastConfig::default());
        let mut r = TestReadiness::default();
        let (id, wire) = connect(&mut b, &mut r);

        let outcome = b.handle_ready(id, Ready::WRITABLE, &mut r).unwrap();

        assert_eq!(outcome, Outcome::Delivered { round_complete: true });
        assert_eq!(wire.borrow().outbound, vec![1]);
        assert_eq!(b.mode(), Mode::Receiving);
        assert_eq!(r.registered[&id], Interest::Read);
        assert_eq!(b.rounds_completed(), 1);
    }

    #[test]
    fn repeated_writable_does_not_duplicate_color() {
        let mut b = Broadcaster::new(BroadcastConfig::default());
        let mut r = TestReadiness::default();
        let (a, wire_a) = connect(&mut b, &mut r);
        let (_b_id, _wire_b) = connect(&mut b, &mut r);

        b.handle_ready(a, Ready::WRITABLE, &mut r).unwrap();
        let outcome = b.handle_ready(a, Ready::WRITABLE, &mut r).unwrap();

        assert_eq!(outcome, Outcome::Ignored);
        assert_eq!(wire_a.borrow().outbound, vec![1]);
        assert_eq!(b.mode(), Mode::Sending);
    }

    #[test]
    fn readable_report_is_ignored_while_sending() {
        let mut b = Broadcaster::new(BroadcastConfig::default());
        let mut r = TestReadiness::default();
        let (id, wire) = connect(&mut b, &mut r);
        wire.borrow_mut().inbound.push_back(9);

        let outcome = b.handle_ready(id, Ready::READABLE, &mut r).unwrap();

        assert_eq!(outcome, Outcome::Ignored);
        assert_eq!(b.color(), Color::RED);
        assert_eq!(wire.borrow().inbound.len(), 1);
    }

    #[test]
    fn proposal_reads_one_byte_and_starts_round() {
        let mut b = Broadcaster::new(BroadcastConfig::default());
        let mut r = TestReadiness::default();
        let (id, wire) = connect(&mut b, &mut r);
        b.handle_ready(id, Ready::WRITABLE, &mut r).unwrap();

        wire.borrow_mut().inbound.extend([3, 5]);
        let outcome = b.handle_ready(id, Ready::READABLE, &mut r).unwrap();

        assert_eq!(outcome, Outcome::Proposed(Color::new(3)));
        assert_eq!(b.color(), Color::new(3));
        assert_eq!(b.mode(), Mode::Sending);
        assert_eq!(wire.borrow().inbound, VecDeque::from([5]));
        assert!(!b.registry().get(id).unwrap().is_sent());
    }

    #[test]
    fn would_block_rearms_same_interest() {
        let mut b = Broadcaster::new(BroadcastConfig::default());
        let mut r = TestReadiness::default();
        let (id, _wire) = connect(&mut b, &mut r);
        b.handle_ready(id, Ready::WRITABLE, &mut r).unwrap();

        let outcome = b.handle_ready(id, Ready::READABLE, &mut r).unwrap();

        assert_eq!(outcome, Outcome::WouldBlock);
        assert_eq!(b.mode(), Mode::Receiving);
        assert_eq!(r.registered[&id], Interest::Read);
    }

    #[test]
    fn end_of_stream_tears_down() {
        let mut b = Broadcaster::new(BroadcastConfig::default());
        let mut r = TestReadiness::default();
        let (id, wire) = connect(&mut b, &mut r);
        b.handle_ready(id, Ready::WRITABLE, &mut r).unwrap();

        wire.borrow_mut().eof = true;
        let outcome = b.handle_ready(id, Ready::READABLE, &mut r).unwrap();

        assert_eq!(outcome, Outcome::Closed);
        assert_eq!(b.connection_count(), 0);
        assert!(r.registered.is_empty());
    }

    #[test]
    fn reset_mid_round_releases_barrier() {
        let mut b = Broadcaster::new(BroadcastConfig::default());
        let mut r = TestReadiness::default();
        let (a, _wire_a) = connect(&mut b, &mut r);
        let (c, wire_c) = connect(&mut b, &mut r);

        b.handle_ready(a, Ready::WRITABLE, &mut r).unwrap();
        assert_eq!(b.mode(), Mode::Sending);

        wire_c.borrow_mut().error = Some(ErrorKind::ConnectionReset);
        let outcome = b.handle_ready(c, Ready::ALL, &mut r).unwrap();

        assert_eq!(outcome, Outcome::Closed);
        assert_eq!(b.mode(), Mode::Receiving);
        assert_eq!(r.registered[&a], Interest::Read);
    }

    #[test]
    fn unexpected_io_error_is_fatal() {
        let mut b = Broadcaster::new(BroadcastConfig::default());
        let mut r = TestReadiness::default();
        let (id, wire) = connect(&mut b, &mut r);

        wire.borrow_mut().error = Some(ErrorKind::InvalidInput);
        let err = b.handle_ready(id, Ready::WRITABLE, &mut r).unwrap_err();

        assert!(matches!(err, BroadcastError::Io { op: "write", .. }));
    }

    #[test]
    fn registration_failure_is_fatal() {
        let mut b = Broadcaster::new(BroadcastConfig::default());
        let mut r = TestReadiness { fail: true, ..Default::default() };

        let wire = Rc::new(RefCell::new(Wire::default()));
        let err = b.accept(TestSocket(wire), &mut r).unwrap_err();

        assert!(matches!(err, BroadcastError::Readiness { op: "register", .. }));
        assert_eq!(b.connection_count(), 0);
    }

    #[test]
    fn round_not_counted_when_rearm_fails() {
        let mut b = Broadcaster::new(BroadcastConfig::default());
        let mut r = TestReadiness::default();
        let (id, wire) = connect(&mut b, &mut r);
        r.fail = true;

        let err = b.handle_ready(id, Ready::WRITABLE, &mut r).unwrap_err();

        assert!(matches!(err, BroadcastError::Readiness { op: "reregister", .. }));
        assert_eq!(err.connection_id(), id);
        assert_eq!(wire.borrow().outbound, vec![1]);
        assert_eq!(b.rounds_completed(), 0);
    }

    #[test]
    fn enter_same_mode_keeps_sent_flags() {
        let mut b = Broadcaster::new(BroadcastConfig::default());
        let mut r = TestReadiness::default();
        let (a, _wire_a) = connect(&mut b, &mut r);
        let (_c, _wire_c) = connect(&mut b, &mut r);
        b.handle_ready(a, Ready::WRITABLE, &mut r).unwrap();

        b.enter_mode(Mode::Sending, &mut r).unwrap();

        assert!(b.registry().get(a).unwrap().is_sent());
    }

    #[test]
    fn teardown_of_unknown_connection_is_noop() {
        let mut b = Broadcaster::<TestSocket>::new(BroadcastConfig::default());
        let mut r = TestReadiness::default();

        assert!(!b.teardown(ConnectionId::new(99), &mut r).unwrap());
    }

    #[test]
    fn ids_are_not_reused() {
        let mut b = Broadcaster::new(BroadcastConfig::default());
        let mut r = TestReadiness::default();
        let (first, _) = connect(&mut b, &mut r);
        b.teardown(first, &mut r).unwrap();

        let (second, _) = connect(&mut b, &mut r);
        assert_ne!(first, second);
    }
}
