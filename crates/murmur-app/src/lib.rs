//! Application layer for Murmur
//!
//! Generic runtime that runs the sync client against any I/O backend, so
//! deterministic simulation exercises the same orchestration code as the
//! production binary.
//!
//! # Components
//!
//! - [`Driver`]: Trait for platform-specific I/O abstraction
//! - [`Runtime`]: Generic orchestration loop using Driver
//! - [`RuntimeHandle`]: Cloneable command sender for the UI

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod driver;
mod handle;
mod runtime;

pub use driver::Driver;
pub use handle::{EventQueue, HandleError, RuntimeEvent, RuntimeHandle, event_channel};
pub use runtime::Runtime;
