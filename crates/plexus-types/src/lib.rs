//! Foundation types for Plexus.
//!
//! This crate provides the identity, temporal, and record types shared by the
//! ledger and the coordination services. Every other Plexus crate depends on
//! `plexus-types`.
//!
//! # Key Types
//!
//! - [`PeerId`]: Opaque, totally ordered identifier of a mesh peer
//! - [`TemporalAnchor`]: Hybrid Logical Clock timestamp for last-writer-wins merges
//! - [`Machine`]: Registry record binding a peer to its virtual address

pub mod error;
pub mod machine;
pub mod peer;
pub mod temporal;

pub use error::TypeError;
pub use machine::Machine;
pub use peer::PeerId;
pub use temporal::{wall_clock_ms, TemporalAnchor};
