//! Deterministic simulation harness for the Unison broadcast core.
//!
//! Runs [`unison_core::Broadcaster`] over in-memory sockets with a seeded
//! dispatch order, so fleet behavior under joins, hang-ups, resets and
//! back-pressure is reproducible without touching the network.
//!
//! # Components
//!
//! - [`SimSocket`] / [`SimPeer`]: the two ends of a simulated connection
//! - [`SimReadiness`]: registration table with epoll's contract
//! - [`SimFleet`]: batch-at-a-time driver standing in for the reactor
//!
//! # Invariant Testing
//!
//! The `invariants` module checks behavioral properties against a
//! [`FleetSnapshot`]. Use [`InvariantRegistry::standard()`] after every
//! step of a scenario or generated operation sequence.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_fleet;
pub mod sim_readiness;
pub mod sim_socket;

pub use invariants::{
    ConnectionSnapshot, ConvergedWhileReceiving, FleetSnapshot, InterestMatchesMode, Invariant,
    InvariantRegistry, InvariantResult, ReceivingImpliesAllSent, SubscriptionsMatchRegistry,
    Violation,
};
pub use sim_fleet::{Dispatch, SimFleet};
pub use sim_readiness::{ReadinessOp, SimReadiness};
pub use sim_socket::{SimPeer, SimSocket, pair};
