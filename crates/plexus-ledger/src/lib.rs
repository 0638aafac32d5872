//! Replicated ledger for Plexus.
//!
//! This crate is the shared memory of a Plexus mesh. It provides:
//! - [`Entry`] values with writer provenance and optional expiration
//! - Immutable [`Block`] snapshots with last-writer-wins merge
//! - The [`Ledger`] service: point reads, one-shot writes, periodic
//!   re-announcement (`persist`) and the replication loop
//! - A [`Transport`] seam with a [`WireCodec`] that can seal frames in transit
//! - [`LocalHub`], an in-process transport for tests and simulations

pub mod block;
pub mod config;
pub mod entry;
pub mod error;
pub mod hlc;
pub mod ledger;
pub mod message;
pub mod transport;

pub use block::{Block, Bucket};
pub use config::LedgerConfig;
pub use entry::{Entry, Record};
pub use error::{LedgerError, Result};
pub use hlc::HybridLogicalClock;
pub use ledger::Ledger;
pub use message::{LedgerMessage, Payload, WireCodec};
pub use transport::{Frame, HubTransport, LocalHub, Transport};
