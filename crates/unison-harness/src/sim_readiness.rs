//! Registration table standing in for epoll.
//!
//! Enforces the same contract the kernel does: `register` on an id that is
//! already registered fails, `reregister`/`deregister` on one that is not
//! fails. Every successful call is logged so tests can assert on the exact
//! sequence of subscription changes.

use std::{
    collections::HashMap,
    io::{self, ErrorKind},
};

use unison_core::{ConnectionId, Interest, Readiness};

use crate::sim_socket::SimSocket;

/// A subscription change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessOp {
    /// New subscription
    Register(ConnectionId, Interest),
    /// Changed subscription
    Reregister(ConnectionId, Interest),
    /// Removed subscription
    Deregister(ConnectionId),
}

/// In-memory [`Readiness`] implementation.
#[derive(Debug, Default)]
pub struct SimReadiness {
    table: HashMap<ConnectionId, Interest>,
    log: Vec<ReadinessOp>,
    failing: bool,
}

impl SimReadiness {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current subscription for `id`.
    pub fn interest(&self, id: ConnectionId) -> Option<Interest> {
        self.table.get(&id).copied()
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// No live subscriptions.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Successful calls so far, oldest first.
    pub fn log(&self) -> &[ReadinessOp] {
        &self.log
    }

    /// Clear the call log.
    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Make every subsequent `register`/`reregister` fail.
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    fn check_failing(&self) -> io::Result<()> {
        if self.failing { Err(io::Error::other("simulated readiness failure")) } else { Ok(()) }
    }
}

impl Readiness<SimSocket> for SimReadiness {
    fn register(
        &mut self,
        _socket: &mut SimSocket,
        id: ConnectionId,
        interest: Interest,
    ) -> io::Result<()> {
        self.check_failing()?;
        if self.table.contains_key(&id) {
            return Err(ErrorKind::AlreadyExists.into());
        }

        self.table.insert(id, interest);
        self.log.push(ReadinessOp::Register(id, interest));
        Ok(())
    }

    fn reregister(
        &mut self,
        _socket: &mut SimSocket,
        id: ConnectionId,
        interest: Interest,
    ) -> io::Result<()> {
        self.check_failing()?;
        let Some(slot) = self.table.get_mut(&id) else {
            return Err(ErrorKind::NotFound.into());
        };

        *slot = interest;
        self.log.push(ReadinessOp::Reregister(id, interest));
        Ok(())
    }

    fn deregister(&mut self, _socket: &mut SimSocket, id: ConnectionId) -> io::Result<()> {
        if self.table.remove(&id).is_none() {
            return Err(ErrorKind::NotFound.into());
        }

        self.log.push(ReadinessOp::Deregister(id));
        Ok(())
    }
}
