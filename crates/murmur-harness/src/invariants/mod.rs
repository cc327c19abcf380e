//! Invariants checked after every state change in a simulation.
//!
//! A check sees a [`SystemSnapshot`], a plain copy of what each client would
//! show the user, never the client itself. That keeps checks independent of
//! the client's internals and lets tests build snapshots by hand.
//!
//! ```ignore
//! let snapshot = SystemSnapshot::single(ClientSnapshot::capture(&client));
//! InvariantRegistry::standard().check_all(&snapshot)?;
//! ```

mod checks;
mod snapshot;

use std::fmt;

pub use checks::{ActiveUnreadZero, ActiveViewOpen, TimelineOrdered, TimelineUnique};
pub use snapshot::{ClientSnapshot, ConversationSnapshot, MessageSnapshot, SystemSnapshot};
use thiserror::Error;

/// Outcome of one invariant check.
pub type InvariantResult = Result<(), Violation>;

/// A broken invariant.
#[derive(Debug, Clone, Error)]
#[error("{invariant}: {message}")]
pub struct Violation {
    /// Invariant that failed.
    pub invariant: &'static str,
    /// What the snapshot showed.
    pub message: String,
}

/// Every violation found in one snapshot.
#[derive(Debug, Clone)]
pub struct Violations(pub Vec<Violation>);

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Violations {}

/// A property of client state.
pub trait Invariant: Send + Sync {
    /// Short name used in violation reports.
    fn name(&self) -> &'static str;

    /// Check one snapshot.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Set of invariants run together.
#[derive(Default)]
pub struct InvariantRegistry {
    checks: Vec<Box<dyn Invariant>>,
}

impl InvariantRegistry {
    /// No invariants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordering, uniqueness, and active-view invariants.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(TimelineOrdered);
        registry.add(TimelineUnique);
        registry.add(ActiveViewOpen);
        registry.add(ActiveUnreadZero);
        registry
    }

    /// Register another invariant.
    pub fn add(&mut self, invariant: impl Invariant + 'static) {
        self.checks.push(Box::new(invariant));
    }

    /// Names of the registered invariants, in check order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.checks.iter().map(|check| check.name())
    }

    /// Run every check. Reports all failures, not just the first.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Violations> {
        let found: Vec<_> = self.checks.iter().filter_map(|check| check.check(state).err()).collect();
        if found.is_empty() { Ok(()) } else { Err(Violations(found)) }
    }
}
