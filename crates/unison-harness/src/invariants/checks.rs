//! Standard broadcast invariants.

use unison_core::Mode;

use super::{FleetSnapshot, Invariant, InvariantResult, Violation};

/// Every live connection is registered for the direction the mode calls for.
///
/// Reading while SENDING would let a second proposal in before the round
/// completes; writing while RECEIVING would re-send a color nobody asked for.
pub struct InterestMatchesMode;

impl Invariant for InterestMatchesMode {
    fn name(&self) -> &'static str {
        "interest_matches_mode"
    }

    fn check(&self, state: &FleetSnapshot) -> InvariantResult {
        let expected = state.mode.interest();
        for conn in &state.connections {
            if conn.interest != expected {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "connection {} wants {:?} in {:?}",
                        conn.id, conn.interest, state.mode
                    ),
                });
            }
        }
        Ok(())
    }
}

/// The readiness table holds exactly one subscription per live connection,
/// matching its interest.
pub struct SubscriptionsMatchRegistry;

impl Invariant for SubscriptionsMatchRegistry {
    fn name(&self) -> &'static str {
        "subscriptions_match_registry"
    }

    fn check(&self, state: &FleetSnapshot) -> InvariantResult {
        if state.subscriptions != state.connections.len() {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "{} subscriptions for {} connections",
                    state.subscriptions,
                    state.connections.len()
                ),
            });
        }

        for conn in &state.connections {
            if conn.subscribed != Some(conn.interest) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "connection {} wants {:?} but is subscribed for {:?}",
                        conn.id, conn.interest, conn.subscribed
                    ),
                });
            }
        }
        Ok(())
    }
}

/// RECEIVING is only entered once the barrier is satisfied.
pub struct ReceivingImpliesAllSent;

impl Invariant for ReceivingImpliesAllSent {
    fn name(&self) -> &'static str {
        "receiving_implies_all_sent"
    }

    fn check(&self, state: &FleetSnapshot) -> InvariantResult {
        if state.mode != Mode::Receiving {
            return Ok(());
        }

        let pending: Vec<_> =
            state.connections.iter().filter(|conn| !conn.sent).map(|conn| conn.id).collect();
        if pending.is_empty() {
            Ok(())
        } else {
            Err(Violation {
                invariant: self.name(),
                message: format!("receiving with undelivered connections {pending:?}"),
            })
        }
    }
}

/// Between rounds every device shows the shared color.
pub struct ConvergedWhileReceiving;

impl Invariant for ConvergedWhileReceiving {
    fn name(&self) -> &'static str {
        "converged_while_receiving"
    }

    fn check(&self, state: &FleetSnapshot) -> InvariantResult {
        if state.mode != Mode::Receiving {
            return Ok(());
        }

        let color = state.color.as_byte();
        for conn in &state.connections {
            if conn.last_received != Some(color) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "connection {} last received {:?}, shared color is {color}",
                        conn.id, conn.last_received
                    ),
                });
            }
        }
        Ok(())
    }
}
