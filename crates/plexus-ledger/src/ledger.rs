use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use plexus_types::{wall_clock_ms, PeerId};

use crate::block::Block;
use crate::config::LedgerConfig;
use crate::entry::{Entry, Record};
use crate::error::{LedgerError, Result};
use crate::hlc::HybridLogicalClock;
use crate::message::{LedgerMessage, WireCodec};
use crate::transport::{Frame, Transport};

/// A peer's replica of the shared ledger.
///
/// The ledger is internally synchronized: every method takes `&self` and may
/// be called from any number of tasks. Reads never touch the network; they
/// see the most recently merged [`Block`]. Writes are merged locally first
/// and then broadcast, and incoming frames are merged by [`Ledger::run`].
pub struct Ledger {
    peer: PeerId,
    clock: HybridLogicalClock,
    head: RwLock<Arc<Block>>,
    transport: Arc<dyn Transport>,
    codec: WireCodec,
    config: LedgerConfig,
    /// Taken by the replication loop on start.
    inbox: Mutex<Option<broadcast::Receiver<Frame>>>,
    /// Active re-announcement task per key pair.
    announcers: Mutex<HashMap<(String, String), CancellationToken>>,
}

impl Ledger {
    /// Create a ledger attached to `transport`.
    ///
    /// The ledger subscribes immediately, so frames published between
    /// construction and [`Ledger::run`] are not lost.
    pub fn new(
        peer: PeerId,
        transport: Arc<dyn Transport>,
        codec: WireCodec,
        config: LedgerConfig,
    ) -> Self {
        let inbox = transport.subscribe();
        Self {
            peer,
            clock: HybridLogicalClock::new(),
            head: RwLock::new(Arc::new(Block::genesis())),
            transport,
            codec,
            config,
            inbox: Mutex::new(Some(inbox)),
            announcers: Mutex::new(HashMap::new()),
        }
    }

    /// The peer this replica belongs to.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer
    }

    /// The most recently merged snapshot.
    pub fn last_block(&self) -> Arc<Block> {
        Arc::clone(&self.head.read().expect("ledger lock poisoned"))
    }

    /// Point lookup against the latest block. Stale entries read as absent.
    pub fn get_key(&self, ledger_key: &str, entry_key: &str) -> Option<Entry> {
        self.last_block()
            .get_live(ledger_key, entry_key, wall_clock_ms())
            .cloned()
    }

    /// Write a non-expiring value once.
    pub async fn add<T: Serialize + ?Sized>(
        &self,
        ledger_key: &str,
        entry_key: &str,
        value: &T,
    ) -> Result<Entry> {
        self.write_once(ledger_key, entry_key, value, None).await
    }

    /// Write a value once; it goes stale `expiration` from now unless
    /// written again.
    pub async fn add_with_expiry<T: Serialize + ?Sized>(
        &self,
        ledger_key: &str,
        entry_key: &str,
        value: &T,
        expiration: Duration,
    ) -> Result<Entry> {
        let expires_at = wall_clock_ms().saturating_add(expiration.as_millis() as u64);
        self.write_once(ledger_key, entry_key, value, Some(expires_at))
            .await
    }

    async fn write_once<T: Serialize + ?Sized>(
        &self,
        ledger_key: &str,
        entry_key: &str,
        value: &T,
        expires_at_ms: Option<u64>,
    ) -> Result<Entry> {
        let record = self.stamp(ledger_key, entry_key, value, expires_at_ms)?;
        self.apply(vec![record.clone()]);
        self.broadcast(LedgerMessage::entries(self.peer.clone(), vec![record.clone()]))
            .await?;
        Ok(record.entry)
    }

    /// Keep publishing `value` every `announce_interval` until `ctx` is
    /// cancelled, each publication expiring `expiration` after it was made.
    ///
    /// The first version is merged locally before this returns. A later call
    /// for the same key pair stops the earlier re-announcement task.
    pub fn persist<T: Serialize + ?Sized>(
        self: &Arc<Self>,
        ctx: &CancellationToken,
        announce_interval: Duration,
        expiration: Duration,
        ledger_key: &str,
        entry_key: &str,
        value: &T,
    ) -> Result<()> {
        let value =
            serde_json::to_value(value).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        let token = ctx.child_token();
        if token.is_cancelled() {
            return Ok(());
        }

        let key = (ledger_key.to_string(), entry_key.to_string());
        let expiry = |ttl: Duration| wall_clock_ms().saturating_add(ttl.as_millis() as u64);

        // Registration and the first stamp happen under one lock, so the
        // registered announcer always owns the newest version of the pair.
        let mut record = {
            let mut announcers = self.announcers.lock().expect("announcer lock poisoned");
            let record = self.stamp(ledger_key, entry_key, &value, Some(expiry(expiration)))?;
            if let Some(previous) = announcers.insert(key.clone(), token.clone()) {
                previous.cancel();
            }
            self.apply(vec![record.clone()]);
            record
        };

        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            let (ledger_key, entry_key) = key;
            loop {
                let message = LedgerMessage::entries(ledger.peer.clone(), vec![record]);
                if let Err(e) = ledger.broadcast(message).await {
                    warn!(%ledger_key, %entry_key, error = %e, "announcement failed");
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(announce_interval) => {}
                }

                record = {
                    let _announcers = ledger.announcers.lock().expect("announcer lock poisoned");
                    if token.is_cancelled() {
                        break;
                    }
                    match ledger.stamp(&ledger_key, &entry_key, &value, Some(expiry(expiration))) {
                        Ok(record) => {
                            ledger.apply(vec![record.clone()]);
                            record
                        }
                        Err(e) => {
                            warn!(%ledger_key, %entry_key, error = %e, "cannot re-stamp entry");
                            break;
                        }
                    }
                };
            }

            let key = (ledger_key, entry_key);
            let mut announcers = ledger.announcers.lock().expect("announcer lock poisoned");
            if announcers.get(&key).is_some_and(CancellationToken::is_cancelled) {
                announcers.remove(&key);
            }
            debug!(ledger_key = %key.0, entry_key = %key.1, "stopped re-announcing");
        });

        Ok(())
    }

    /// Remove garbage: entries expired for longer than the grace period.
    /// Returns the number of entries removed.
    pub fn collect_garbage(&self) -> usize {
        let cutoff = wall_clock_ms().saturating_sub(self.config.gc_grace.as_millis() as u64);
        self.replace_with(|block| block.collect_garbage(cutoff))
    }

    /// Locally drop entries under `ledger_key` matching `stale`.
    /// Returns the number of entries removed.
    pub fn prune<F>(&self, ledger_key: &str, stale: F) -> usize
    where
        F: Fn(&Entry) -> bool,
    {
        self.replace_with(|block| block.prune(ledger_key, &stale))
    }

    /// Broadcast the full current snapshot.
    pub async fn announce_snapshot(&self) -> Result<()> {
        let block = self.last_block();
        if block.is_empty() {
            return Ok(());
        }
        self.broadcast(LedgerMessage::snapshot(self.peer.clone(), (*block).clone()))
            .await
    }

    /// Replication loop: merge incoming frames, and every sync interval
    /// collect garbage and announce a snapshot. Runs until `ctx` is cancelled
    /// or the transport closes.
    pub async fn run(&self, ctx: CancellationToken) -> Result<()> {
        let mut inbox = self
            .inbox
            .lock()
            .expect("inbox lock poisoned")
            .take()
            .ok_or(LedgerError::AlreadyRunning)?;

        let mut sync = tokio::time::interval(self.config.sync_interval);
        sync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(peer = %self.peer, sealed = self.codec.is_sealed(), "ledger replication started");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                frame = inbox.recv() => match frame {
                    Ok(frame) => match self.receive(&frame) {
                        Ok(true) => {
                            let head = self.last_block();
                            debug!(index = head.index, hash = %head.short_hash(), "merged remote entries");
                        }
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "dropping ledger frame"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "ledger inbox lagged; waiting for next snapshot");
                    }
                    Err(RecvError::Closed) => {
                        info!("transport closed");
                        break;
                    }
                },
                _ = sync.tick() => {
                    let collected = self.collect_garbage();
                    if collected > 0 {
                        debug!(collected, "collected expired entries");
                    }
                    if let Err(e) = self.announce_snapshot().await {
                        warn!(error = %e, "snapshot announcement failed");
                    }
                }
            }
        }

        info!(peer = %self.peer, "ledger replication stopped");
        Ok(())
    }

    /// Decode and merge one frame. Returns `true` if the head changed.
    fn receive(&self, frame: &[u8]) -> Result<bool> {
        let message = self.codec.decode(frame)?;
        if message.from == self.peer {
            return Ok(false);
        }

        // Entries past their grace period are not resurrected by stale peers.
        let cutoff = wall_clock_ms().saturating_sub(self.config.gc_grace.as_millis() as u64);
        let records: Vec<Record> = message
            .into_records()?
            .into_iter()
            .filter(|record| !record.entry.is_expired(cutoff))
            .collect();

        for record in &records {
            self.clock.update(&record.entry.timestamp);
        }
        Ok(self.apply(records))
    }

    fn stamp<T: Serialize + ?Sized>(
        &self,
        ledger_key: &str,
        entry_key: &str,
        value: &T,
        expires_at_ms: Option<u64>,
    ) -> Result<Record> {
        let entry = Entry::encode(value, self.peer.clone(), self.clock.now(), expires_at_ms)?;
        Ok(Record::new(ledger_key, entry_key, entry))
    }

    fn apply(&self, records: Vec<Record>) -> bool {
        let mut head = self.head.write().expect("ledger lock poisoned");
        match head.merge(records) {
            Some(next) => {
                *head = Arc::new(next);
                true
            }
            None => false,
        }
    }

    fn replace_with<F>(&self, f: F) -> usize
    where
        F: FnOnce(&Block) -> Option<Block>,
    {
        let mut head = self.head.write().expect("ledger lock poisoned");
        match f(&head) {
            Some(next) => {
                let removed = head.len().saturating_sub(next.len());
                *head = Arc::new(next);
                removed
            }
            None => 0,
        }
    }

    async fn broadcast(&self, message: LedgerMessage) -> Result<()> {
        let frame = self.codec.encode(&message)?;
        self.transport.publish(frame).await
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let head = self.last_block();
        f.debug_struct("Ledger")
            .field("peer", &self.peer)
            .field("index", &head.index)
            .field("entries", &head.len())
            .finish()
    }
}
