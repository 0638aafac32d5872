use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use plexus_crypto::Sealer;
use plexus_types::PeerId;

use crate::block::Block;
use crate::entry::Record;
use crate::error::{LedgerError, Result};

/// What a ledger message carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Freshly written entries (a write or a re-announcement).
    Entries(Vec<Record>),
    /// The sender's full current snapshot, for anti-entropy.
    Snapshot(Block),
}

/// A message exchanged between ledgers over the overlay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMessage {
    pub from: PeerId,
    pub payload: Payload,
}

impl LedgerMessage {
    pub fn entries(from: PeerId, records: Vec<Record>) -> Self {
        Self {
            from,
            payload: Payload::Entries(records),
        }
    }

    pub fn snapshot(from: PeerId, block: Block) -> Self {
        Self {
            from,
            payload: Payload::Snapshot(block),
        }
    }

    /// Records carried by the message, whatever the payload kind.
    ///
    /// A snapshot whose hash does not match its contents is rejected whole.
    pub fn into_records(self) -> Result<Vec<Record>> {
        match self.payload {
            Payload::Entries(records) => Ok(records),
            Payload::Snapshot(block) if block.verify() => Ok(block.records()),
            Payload::Snapshot(block) => Err(LedgerError::Decode(format!(
                "snapshot {} does not match its contents",
                block.short_hash()
            ))),
        }
    }
}

/// Frame encoder for ledger messages.
///
/// Messages are bincode-encoded. When a network key is configured, every
/// frame is sealed with it, so peers without the key can neither read nor
/// forge ledger traffic.
#[derive(Clone)]
pub struct WireCodec {
    sealing: Option<(Arc<dyn Sealer>, String)>,
}

impl WireCodec {
    /// Frames travel unsealed.
    pub fn plain() -> Self {
        Self { sealing: None }
    }

    /// Frames are sealed with `key`.
    pub fn sealed(sealer: Arc<dyn Sealer>, key: impl Into<String>) -> Self {
        Self {
            sealing: Some((sealer, key.into())),
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealing.is_some()
    }

    pub fn encode(&self, message: &LedgerMessage) -> Result<Vec<u8>> {
        let bytes =
            bincode::serialize(message).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        match &self.sealing {
            None => Ok(bytes),
            Some((sealer, key)) => Ok(sealer.seal(&bytes, key)?.into_bytes()),
        }
    }

    pub fn decode(&self, frame: &[u8]) -> Result<LedgerMessage> {
        let bytes = match &self.sealing {
            None => frame.to_vec(),
            Some((sealer, key)) => {
                let token = std::str::from_utf8(frame)
                    .map_err(|e| LedgerError::Decode(e.to_string()))?;
                sealer.unseal(token, key)?
            }
        };
        bincode::deserialize(&bytes).map_err(|e| LedgerError::Decode(e.to_string()))
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::plain()
    }
}

impl fmt::Debug for WireCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireCodec")
            .field("sealed", &self.is_sealed())
            .finish()
    }
}
