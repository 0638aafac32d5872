use serde::{Deserialize, Serialize};

use crate::peer::PeerId;

/// A peer's entry in the machine registry.
///
/// Recorded under the `machines` ledger key with the peer id as entry key.
/// Only the peer named in the record is expected to write or refresh it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    #[serde(rename = "PeerID")]
    pub peer_id: PeerId,
    /// Virtual address, without prefix length.
    #[serde(rename = "Address")]
    pub address: String,
}

impl Machine {
    pub fn new(peer_id: PeerId, address: impl Into<String>) -> Self {
        Self {
            peer_id,
            address: address.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_field_names() {
        let m = Machine::new(PeerId::new("QmA").unwrap(), "10.1.0.2");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["PeerID"], "QmA");
        assert_eq!(json["Address"], "10.1.0.2");
    }
}
