use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use plexus_types::{PeerId, TemporalAnchor};

use crate::error::{LedgerError, Result};

/// A single value stored under a `(ledger key, entry key)` pair.
///
/// The value is kept as JSON bytes so any peer can decode it into the shape it
/// expects without the ledger knowing about service types. Provenance
/// (`origin`, `timestamp`) drives last-writer-wins merges.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// JSON-encoded value.
    pub value: Vec<u8>,
    /// Peer that wrote this version.
    pub origin: PeerId,
    /// HLC timestamp of the write.
    pub timestamp: TemporalAnchor,
    /// Wall-clock millisecond after which the entry is stale.
    pub expires_at_ms: Option<u64>,
}

impl Entry {
    /// Encode `value` into a new entry.
    pub fn encode<T: Serialize + ?Sized>(
        value: &T,
        origin: PeerId,
        timestamp: TemporalAnchor,
        expires_at_ms: Option<u64>,
    ) -> Result<Self> {
        let value =
            serde_json::to_vec(value).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        Ok(Self {
            value,
            origin,
            timestamp,
            expires_at_ms,
        })
    }

    /// Decode the value into a caller-supplied shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.value).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    /// Returns `true` once `now_ms` has reached the expiration horizon.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at_ms, Some(deadline) if deadline <= now_ms)
    }

    /// Last-writer-wins: later timestamp wins, writer id breaks ties.
    pub fn supersedes(&self, other: &Entry) -> bool {
        (self.timestamp, &self.origin) > (other.timestamp, &other.origin)
    }
}

/// An entry addressed by its key pair, as carried on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub ledger_key: String,
    pub entry_key: String,
    pub entry: Entry,
}

impl Record {
    pub fn new(ledger_key: impl Into<String>, entry_key: impl Into<String>, entry: Entry) -> Self {
        Self {
            ledger_key: ledger_key.into(),
            entry_key: entry_key.into(),
            entry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str) -> PeerId {
        PeerId::new(id).unwrap()
    }

    #[test]
    fn decode_into_caller_shape() {
        let entry = Entry::encode(&"QmLeader", peer("a"), TemporalAnchor::new(1, 0), None).unwrap();
        let lead: String = entry.decode().unwrap();
        assert_eq!(lead, "QmLeader");
        assert!(entry.decode::<u64>().is_err());
    }

    #[test]
    fn expiry_is_inclusive_of_deadline() {
        let entry = Entry::encode(&1, peer("a"), TemporalAnchor::new(0, 0), Some(1_000)).unwrap();
        assert!(!entry.is_expired(999));
        assert!(entry.is_expired(1_000));

        let forever = Entry::encode(&1, peer("a"), TemporalAnchor::new(0, 0), None).unwrap();
        assert!(!forever.is_expired(u64::MAX));
    }

    #[test]
    fn later_timestamp_supersedes() {
        let old = Entry::encode(&1, peer("z"), TemporalAnchor::new(10, 0), None).unwrap();
        let new = Entry::encode(&2, peer("a"), TemporalAnchor::new(10, 1), None).unwrap();
        assert!(new.supersedes(&old));
        assert!(!old.supersedes(&new));
    }

    #[test]
    fn origin_breaks_timestamp_ties() {
        let a = Entry::encode(&1, peer("a"), TemporalAnchor::new(10, 0), None).unwrap();
        let b = Entry::encode(&2, peer("b"), TemporalAnchor::new(10, 0), None).unwrap();
        assert!(b.supersedes(&a));
        assert!(!a.supersedes(&b));
        assert!(!a.supersedes(&a));
    }
}
