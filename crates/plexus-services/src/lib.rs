//! Coordination services for Plexus.
//!
//! Services meet only in the [`Ledger`](plexus_ledger::Ledger); each runs as
//! its own task with a poll-and-sleep cycle and stops on cancellation.
//!
//! - [`leader()`]: deterministic election over a set of peer ids
//! - [`available_nodes`] and [`AliveService`]: heartbeat-based liveness
//! - [`next_ip`]: lowest free address of a range
//! - [`Allocator`]: the address allocation state machine
//! - [`LeaseStore`]: the node-local record of a past allocation
//! - [`Node`]: assembles all of the above from a [`NodeConfig`]

pub mod alive;
pub mod allocator;
pub mod config;
pub mod error;
pub mod iface;
pub mod leader;
pub mod lease;
pub mod nextip;
pub mod node;
pub mod protocol;

pub use alive::{available_nodes, AliveConfig, AliveService};
pub use allocator::{decide, Allocator, AllocatorConfig, Decision, LeaseWaiter, Observation};
pub use config::NodeConfig;
pub use error::{
    AllocatorError, ConfigError, IfaceError, NextIpError, ServiceError, ServiceResult,
};
pub use iface::{NetworkInterface, NoopInterface};
pub use leader::leader;
pub use lease::LeaseStore;
pub use nextip::{next_ip, AddressRange};
pub use node::{Node, NodeHandle};
