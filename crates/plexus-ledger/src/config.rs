use std::time::Duration;

/// Configuration for a [`Ledger`](crate::Ledger).
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// Interval between full snapshot announcements (anti-entropy).
    pub sync_interval: Duration,
    /// How long an expired entry is kept before garbage collection.
    pub gc_grace: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(10),
            gc_grace: Duration::from_secs(60),
        }
    }
}
