//! Deterministic simulation harness for the Murmur sync engine.
//!
//! Virtual-time implementations of the Environment and Driver traits run the
//! real [`murmur_app::Runtime`] against an in-memory backend, so every
//! interleaving of pushes, history pages and send results is reproducible
//! from a seed.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Invariants verify WHAT must be true across all execution paths, not
//! specific scenarios. Use [`InvariantRegistry::standard()`] for the client
//! invariants.
//!
//! # Generated Scenarios
//!
//! [`Operation`] sequences (from proptest or a fuzzer) drive a [`Simulation`];
//! [`Simulation::converge`] then checks that every open view ends up matching
//! the server.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod scenario;
pub mod sim_driver;
pub mod sim_env;
pub mod sim_server;

pub use invariants::{
    ClientSnapshot, ConversationSnapshot, Invariant, InvariantRegistry, InvariantResult,
    MessageSnapshot, SystemSnapshot, Violation, Violations,
};
pub use scenario::{Operation, Simulation};
pub use sim_driver::{SimDriver, SimDriverError};
pub use sim_env::SimEnv;
pub use sim_server::SimServer;
