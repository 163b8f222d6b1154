//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties that must hold after every dispatched event,
//! whatever the interleaving. The fleet's observable state is captured into a
//! [`FleetSnapshot`] and every registered [`Invariant`] is run against it.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! registry.check_all(&fleet.snapshot())?;
//! ```

mod checks;
mod snapshot;

pub use checks::{
    ConvergedWhileReceiving, InterestMatchesMode, ReceivingImpliesAllSent,
    SubscriptionsMatchRegistry,
};
pub use snapshot::{ConnectionSnapshot, FleetSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against a [`FleetSnapshot`].
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against the current state.
    fn check(&self, state: &FleetSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Create a registry with every broadcast invariant.
    ///
    /// Includes:
    /// - [`InterestMatchesMode`]: each connection wants the mode's direction
    /// - [`SubscriptionsMatchRegistry`]: readiness table mirrors the registry
    /// - [`ReceivingImpliesAllSent`]: no round is left half-delivered
    /// - [`ConvergedWhileReceiving`]: every device shows the current color
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(InterestMatchesMode);
        registry.add(SubscriptionsMatchRegistry);
        registry.add(ReceivingImpliesAllSent);
        registry.add(ConvergedWhileReceiving);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the given state.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, state: &FleetSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation found.
    #[allow(clippy::panic, reason = "assertion helper for tests")]
    pub fn assert_all(&self, state: &FleetSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_has_invariants() {
        let registry = InvariantRegistry::standard();
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn empty_snapshot_passes_invariants() {
        let registry = InvariantRegistry::standard();
        assert!(registry.check_all(&FleetSnapshot::empty()).is_ok());
    }
}
