//! Observable fleet state.

use unison_core::{Color, ConnectionId, Interest, Mode};

use crate::SimFleet;

/// One live connection as the server and its device see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Connection id
    pub id: ConnectionId,
    /// Interest the connection believes it has
    pub interest: Interest,
    /// Delivered the current color this round
    pub sent: bool,
    /// Interest in the readiness table, if any
    pub subscribed: Option<Interest>,
    /// Last byte the device received
    pub last_received: Option<u8>,
}

/// Whole-fleet state at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetSnapshot {
    /// Global mode
    pub mode: Mode,
    /// Shared color
    pub color: Color,
    /// Completed rounds
    pub rounds_completed: u64,
    /// Live connections, ascending by id
    pub connections: Vec<ConnectionSnapshot>,
    /// Entries in the readiness table
    pub subscriptions: usize,
}

impl FleetSnapshot {
    /// A server with no connections.
    pub fn empty() -> Self {
        Self {
            mode: Mode::Receiving,
            color: Color::default(),
            rounds_completed: 0,
            connections: Vec::new(),
            subscriptions: 0,
        }
    }

    /// Capture a fleet.
    pub fn from_fleet(fleet: &SimFleet) -> Self {
        let broadcaster = fleet.broadcaster();
        let connections = fleet
            .live_ids()
            .into_iter()
            .filter_map(|id| {
                let conn = broadcaster.registry().get(id)?;
                Some(ConnectionSnapshot {
                    id,
                    interest: conn.interest(),
                    sent: conn.is_sent(),
                    subscribed: fleet.readiness().interest(id),
                    last_received: fleet.peer(id).and_then(|peer| peer.last_received()),
                })
            })
            .collect();

        Self {
            mode: broadcaster.mode(),
            color: broadcaster.color(),
            rounds_completed: broadcaster.rounds_completed(),
            connections,
            subscriptions: fleet.readiness().len(),
        }
    }
}
