use plexus_crypto::SealError;

/// Errors produced by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A value could not be encoded into or decoded from an entry.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A wire frame could not be decoded.
    #[error("malformed frame: {0}")]
    Decode(String),

    /// A sealed frame failed to unseal (wrong network key or tampering).
    #[error("seal error: {0}")]
    Seal(#[from] SealError),

    /// The transport refused a frame.
    #[error("transport error: {0}")]
    Transport(String),

    /// `run` was called on a ledger whose replication loop is already running.
    #[error("replication loop already running")]
    AlreadyRunning,
}

/// Convenience alias used throughout the ledger crate.
pub type Result<T> = std::result::Result<T, LedgerError>;
