use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use plexus_crypto::ContentHasher;

use crate::entry::{Entry, Record};

/// Entries under one ledger key, by entry key.
pub type Bucket = BTreeMap<String, Entry>;

/// Immutable snapshot of the ledger state.
///
/// Blocks are never mutated in place: merging records or collecting garbage
/// yields a new block whose `prev_hash` links to its parent. Storage uses
/// sorted maps so the hash is a pure function of the contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Position in this peer's local chain of snapshots.
    pub index: u64,
    pub prev_hash: [u8; 32],
    /// BLAKE3 over the storage (see [`Block::compute_hash`]).
    pub hash: [u8; 32],
    pub storage: BTreeMap<String, Bucket>,
}

impl Block {
    /// The empty block every ledger starts from.
    pub fn genesis() -> Self {
        Self::seal(0, [0u8; 32], BTreeMap::new())
    }

    fn seal(index: u64, prev_hash: [u8; 32], storage: BTreeMap<String, Bucket>) -> Self {
        let hash = Self::compute_hash(&storage);
        Self {
            index,
            prev_hash,
            hash,
            storage,
        }
    }

    fn child(&self, storage: BTreeMap<String, Bucket>) -> Self {
        Self::seal(self.index + 1, self.hash, storage)
    }

    /// Content hash of a storage map.
    ///
    /// Two peers holding the same entries compute the same hash, regardless
    /// of the order in which they merged them.
    pub fn compute_hash(storage: &BTreeMap<String, Bucket>) -> [u8; 32] {
        match bincode::serialize(storage) {
            Ok(bytes) => ContentHasher::BLOCK.hash(&bytes),
            Err(_) => [0u8; 32],
        }
    }

    /// Returns `true` if the stored hash matches the contents.
    pub fn verify(&self) -> bool {
        self.hash == Self::compute_hash(&self.storage)
    }

    /// Short hex form of the hash for log lines.
    pub fn short_hash(&self) -> String {
        hex::encode(&self.hash[..4])
    }

    /// Raw lookup, including stale entries.
    pub fn get(&self, ledger_key: &str, entry_key: &str) -> Option<&Entry> {
        self.storage.get(ledger_key)?.get(entry_key)
    }

    /// Lookup that treats stale entries as absent.
    pub fn get_live(&self, ledger_key: &str, entry_key: &str, now_ms: u64) -> Option<&Entry> {
        self.get(ledger_key, entry_key)
            .filter(|entry| !entry.is_expired(now_ms))
    }

    /// All entries under a ledger key, including stale ones.
    pub fn bucket(&self, ledger_key: &str) -> Option<&Bucket> {
        self.storage.get(ledger_key)
    }

    /// Non-expired entries under a ledger key, in entry-key order.
    pub fn live_entries<'a>(
        &'a self,
        ledger_key: &str,
        now_ms: u64,
    ) -> impl Iterator<Item = (&'a str, &'a Entry)> + 'a {
        self.storage
            .get(ledger_key)
            .into_iter()
            .flat_map(|bucket| bucket.iter())
            .filter(move |(_, entry)| !entry.is_expired(now_ms))
            .map(|(key, entry)| (key.as_str(), entry))
    }

    /// Every stored entry as a wire record.
    pub fn records(&self) -> Vec<Record> {
        self.storage
            .iter()
            .flat_map(|(ledger_key, bucket)| {
                bucket
                    .iter()
                    .map(move |(entry_key, entry)| Record::new(ledger_key, entry_key, entry.clone()))
            })
            .collect()
    }

    /// Total number of stored entries.
    pub fn len(&self) -> usize {
        self.storage.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge records using last-writer-wins per key pair.
    ///
    /// Returns `None` when nothing changed, so merging is idempotent and a
    /// peer does not grow its chain on redundant announcements.
    pub fn merge<I>(&self, records: I) -> Option<Block>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut storage = self.storage.clone();
        let mut changed = false;

        for record in records {
            let bucket = storage.entry(record.ledger_key).or_default();
            let newer = match bucket.get(&record.entry_key) {
                Some(current) => record.entry.supersedes(current),
                None => true,
            };
            if newer {
                bucket.insert(record.entry_key, record.entry);
                changed = true;
            }
        }

        changed.then(|| self.child(storage))
    }

    /// Drop entries that expired at or before `cutoff_ms`.
    pub fn collect_garbage(&self, cutoff_ms: u64) -> Option<Block> {
        self.retain(|_, entry| !entry.is_expired(cutoff_ms))
    }

    /// Drop entries under `ledger_key` for which `stale` returns `true`.
    pub fn prune<F>(&self, ledger_key: &str, stale: F) -> Option<Block>
    where
        F: Fn(&Entry) -> bool,
    {
        self.retain(|key, entry| key != ledger_key || !stale(entry))
    }

    fn retain<F>(&self, keep: F) -> Option<Block>
    where
        F: Fn(&str, &Entry) -> bool,
    {
        let mut storage = BTreeMap::new();
        let mut removed = false;

        for (ledger_key, bucket) in &self.storage {
            let kept: Bucket = bucket
                .iter()
                .filter(|(_, entry)| keep(ledger_key.as_str(), entry))
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect();
            removed |= kept.len() != bucket.len();
            if !kept.is_empty() {
                storage.insert(ledger_key.clone(), kept);
            }
        }

        removed.then(|| self.child(storage))
    }
}
