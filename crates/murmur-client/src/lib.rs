//! Client
//!
//! Action-based sync client for Murmur conversations. Keeps one timeline per
//! open conversation consistent across live pushes, paged history, and
//! optimistic sends.
//!
//! # Architecture
//!
//! The client follows the same Sans-IO and Action-Based patterns as
//! [`murmur_core`]. It receives events ([`ClientEvent`]), processes them
//! through pure state machine logic, and returns actions ([`ClientAction`]) for
//! the caller to execute.
//!
//! # Components
//!
//! - [`SyncClient`]: Top-level state machine owning the connection and views
//! - [`ClientEvent`]: Events fed into the client
//! - [`ClientAction`]: Actions produced by the client
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::open`]: Open the push channel over WebSocket
//! - [`rest::RestApi`]: History and send endpoints over HTTP

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
mod event;

#[cfg(feature = "transport")]
pub mod rest;
#[cfg(feature = "transport")]
pub mod transport;

pub use client::{ClientConfig, DEFAULT_ENDPOINT, SyncClient};
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent, FileUpload, OutgoingBody, Submission};
pub use murmur_core::{ConnectionState, Environment};
