use std::path::PathBuf;

use thiserror::Error;

use plexus_ledger::LedgerError;
use plexus_types::TypeError;

/// Errors from address arithmetic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NextIpError {
    #[error("invalid address range: {0}")]
    InvalidRange(String),

    #[error("no free address left in {0}")]
    Exhausted(String),
}

/// Errors from the network-interface collaborator.
#[derive(Debug, Error)]
pub enum IfaceError {
    #[error("cannot gate subnet {cidr}: {reason}")]
    Gate { cidr: String, reason: String },
}

/// Errors that end the address allocator.
///
/// Transient coordination states (too few peers, no leader yet, backing off)
/// never surface here.
#[derive(Debug, Error)]
pub enum AllocatorError {
    #[error("allocator stopped before an address was leased")]
    Cancelled,

    #[error("address error: {0}")]
    Address(#[from] NextIpError),

    #[error("subnet gate failed: {0}")]
    Gate(#[from] IfaceError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Errors from loading or validating a node configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level error for running a node.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("allocator error: {0}")]
    Allocator(#[from] AllocatorError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid peer id: {0}")]
    Peer(#[from] TypeError),

    #[error("address error: {0}")]
    Address(#[from] NextIpError),

    #[error("network interface error: {0}")]
    Interface(#[from] IfaceError),

    #[error("task failed: {0}")]
    Task(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
