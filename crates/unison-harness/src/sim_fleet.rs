//! Deterministic fleet driver.
//!
//! [`SimFleet`] owns a [`Broadcaster`] over [`SimSocket`]s and plays the part
//! of the reactor. Each [`SimFleet::poll_once`] snapshots readiness for every
//! live connection (the way one epoll wait returns a batch), shuffles the
//! batch with a seeded RNG, then dispatches it. Because the batch is
//! computed up front, later events in it can be stale by the time they are
//! dispatched: a readable event for a connection an earlier event already
//! flipped to write, or an event for a connection already torn down. That is
//! exactly the situation the state machine has to tolerate in production.

use std::collections::BTreeMap;

use rand::{SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;
use unison_core::{
    BroadcastConfig, BroadcastError, Broadcaster, Color, ConnectionId, Interest, Mode, Outcome,
    Ready,
};

use crate::{
    invariants::FleetSnapshot,
    sim_readiness::SimReadiness,
    sim_socket::{self, SimPeer, SimSocket},
};

/// One dispatched readiness event and the state right after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Connection the event was for
    pub id: ConnectionId,
    /// Readiness reported
    pub ready: Ready,
    /// What the state machine did
    pub outcome: Outcome,
    /// Mode after dispatch
    pub mode: Mode,
    /// Color after dispatch
    pub color: Color,
    /// Completed rounds after dispatch
    pub rounds_completed: u64,
}

/// Simulated server plus device fleet.
#[derive(Debug)]
pub struct SimFleet {
    broadcaster: Broadcaster<SimSocket>,
    readiness: SimReadiness,
    peers: BTreeMap<ConnectionId, SimPeer>,
    rng: ChaCha8Rng,
    history: Vec<Dispatch>,
}

impl SimFleet {
    /// Create an empty fleet. `seed` fixes the dispatch order of every batch.
    pub fn new(config: BroadcastConfig, seed: u64) -> Self {
        Self {
            broadcaster: Broadcaster::new(config),
            readiness: SimReadiness::new(),
            peers: BTreeMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            history: Vec::new(),
        }
    }

    /// Connect a new device. Acceptance happens immediately.
    pub fn connect(&mut self) -> Result<ConnectionId, BroadcastError> {
        let (socket, peer) = sim_socket::pair();
        let id = self.broadcaster.accept(socket, &mut self.readiness)?;
        self.peers.insert(id, peer);
        Ok(id)
    }

    /// Device end of a connection, live or departed.
    pub fn peer(&self, id: ConnectionId) -> Option<&SimPeer> {
        self.peers.get(&id)
    }

    /// Ids the server still tracks, ascending.
    pub fn live_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.broadcaster.registry().ids().collect();
        ids.sort_unstable();
        ids
    }

    /// Have a device send a proposal. Returns `false` for an unknown id.
    pub fn propose(&self, id: ConnectionId, color: Color) -> bool {
        self.with_peer(id, |peer| peer.send(color.as_byte()))
    }

    /// Have a device hang up.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.with_peer(id, SimPeer::close)
    }

    /// Have a device's connection reset.
    pub fn reset(&self, id: ConnectionId) -> bool {
        self.with_peer(id, SimPeer::reset)
    }

    /// Apply or lift back-pressure on a device.
    pub fn block_writes(&self, id: ConnectionId, blocked: bool) -> bool {
        self.with_peer(id, |peer| peer.block_writes(blocked))
    }

    fn with_peer(&self, id: ConnectionId, f: impl FnOnce(&SimPeer)) -> bool {
        match self.peers.get(&id) {
            Some(peer) => {
                f(peer);
                true
            },
            None => false,
        }
    }

    /// Readiness as one wait would report it, in dispatch order.
    ///
    /// Only the registered direction is reported, except that an error or
    /// hang-up is reported in both directions.
    pub fn pending_batch(&mut self) -> Vec<(ConnectionId, Ready)> {
        let mut batch = Vec::new();

        for id in self.live_ids() {
            let (Some(interest), Some(peer)) = (self.readiness.interest(id), self.peers.get(&id))
            else {
                continue;
            };

            let ready = if peer.server_failed() {
                Ready::ALL
            } else {
                match interest {
                    Interest::Read if peer.server_readable() => Ready::READABLE,
                    Interest::Write if peer.server_writable() => Ready::WRITABLE,
                    _ => continue,
                }
            };
            batch.push((id, ready));
        }

        batch.shuffle(&mut self.rng);
        batch
    }

    /// Dispatch one batch. Returns how many events made progress (anything
    /// other than [`Outcome::Ignored`] or [`Outcome::WouldBlock`]).
    pub fn poll_once(&mut self) -> Result<usize, BroadcastError> {
        let batch = self.pending_batch();
        let mut progressed = 0;

        for (id, ready) in batch {
            let outcome = self.broadcaster.handle_ready(id, ready, &mut self.readiness)?;
            if !matches!(outcome, Outcome::Ignored | Outcome::WouldBlock) {
                progressed += 1;
            }

            tracing::trace!(conn = %id, ?ready, ?outcome, "dispatched");
            self.history.push(Dispatch {
                id,
                ready,
                outcome,
                mode: self.broadcaster.mode(),
                color: self.broadcaster.color(),
                rounds_completed: self.broadcaster.rounds_completed(),
            });
        }

        Ok(progressed)
    }

    /// Poll until a batch makes no progress. Returns `false` if still busy
    /// after `max_polls` batches.
    pub fn run_until_quiet(&mut self, max_polls: usize) -> Result<bool, BroadcastError> {
        for _ in 0..max_polls {
            if self.poll_once()? == 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The state machine under test.
    pub fn broadcaster(&self) -> &Broadcaster<SimSocket> {
        &self.broadcaster
    }

    /// The registration table.
    pub fn readiness(&self) -> &SimReadiness {
        &self.readiness
    }

    /// The registration table, for fault injection.
    pub fn readiness_mut(&mut self) -> &mut SimReadiness {
        &mut self.readiness
    }

    /// Every dispatch so far, oldest first.
    pub fn history(&self) -> &[Dispatch] {
        &self.history
    }

    /// Observable state for invariant checks.
    pub fn snapshot(&self) -> FleetSnapshot {
        FleetSnapshot::from_fleet(self)
    }
}
