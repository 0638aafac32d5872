use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use plexus_ledger::Ledger;
use plexus_types::{wall_clock_ms, PeerId};

use crate::error::ServiceResult;
use crate::protocol::HEALTHCHECK_LEDGER_KEY;

/// Peers with a heartbeat newer than `now - max_time`, in id order.
///
/// Read-only: a peer whose heartbeat is missing, stale or older than the
/// window is simply not part of the view.
pub fn available_nodes(ledger: &Ledger, max_time: Duration) -> Vec<PeerId> {
    let now = wall_clock_ms();
    let horizon = now.saturating_sub(max_time.as_millis() as u64);
    let block = ledger.last_block();

    let mut nodes: Vec<PeerId> = block
        .live_entries(HEALTHCHECK_LEDGER_KEY, now)
        .filter_map(|(key, entry)| {
            let seen: u64 = entry.decode().ok()?;
            if seen <= horizon {
                return None;
            }
            PeerId::new(key).ok()
        })
        .collect();
    nodes.sort();
    nodes
}

/// Timing of the liveness publisher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AliveConfig {
    /// How often this node publishes its heartbeat.
    pub healthcheck_interval: Duration,
    /// How often stale heartbeats are pruned from the local ledger.
    pub scrub_interval: Duration,
    /// Heartbeats older than this are considered dead.
    pub max_interval: Duration,
}

impl Default for AliveConfig {
    fn default() -> Self {
        Self {
            healthcheck_interval: Duration::from_secs(30),
            scrub_interval: Duration::from_secs(600),
            max_interval: Duration::from_secs(900),
        }
    }
}

/// Publishes this node's heartbeat and scrubs dead ones.
pub struct AliveService {
    ledger: Arc<Ledger>,
    config: AliveConfig,
}

impl AliveService {
    pub fn new(ledger: Arc<Ledger>, config: AliveConfig) -> Self {
        Self { ledger, config }
    }

    /// Run until `ctx` is cancelled.
    pub async fn run(self, ctx: CancellationToken) -> ServiceResult<()> {
        let mut heartbeat = tokio::time::interval(self.config.healthcheck_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut scrub = tokio::time::interval(self.config.scrub_interval);
        scrub.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first scrub tick fires immediately; there is nothing to scrub yet.
        scrub.tick().await;

        info!(
            peer = %self.ledger.peer_id(),
            interval_ms = self.config.healthcheck_interval.as_millis() as u64,
            "liveness service started"
        );

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = heartbeat.tick() => self.beat().await,
                _ = scrub.tick() => {
                    let removed = self.scrub();
                    if removed > 0 {
                        debug!(removed, "scrubbed stale heartbeats");
                    }
                }
            }
        }

        info!(peer = %self.ledger.peer_id(), "liveness service stopped");
        Ok(())
    }

    async fn beat(&self) {
        let peer = self.ledger.peer_id().as_str();
        if let Err(e) = self
            .ledger
            .add_with_expiry(
                HEALTHCHECK_LEDGER_KEY,
                peer,
                &wall_clock_ms(),
                self.config.max_interval,
            )
            .await
        {
            warn!(error = %e, "heartbeat failed");
        }
    }

    fn scrub(&self) -> usize {
        let horizon = wall_clock_ms().saturating_sub(self.config.max_interval.as_millis() as u64);
        self.ledger.prune(HEALTHCHECK_LEDGER_KEY, |entry| {
            entry
                .decode::<u64>()
                .map(|seen| seen <= horizon)
                .unwrap_or(true)
        })
    }
}
