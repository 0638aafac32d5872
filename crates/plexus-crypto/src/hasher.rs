/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g. `"plexus-lease-v1"`) that is
/// prepended to every hash computation, so a lease key and a block hash over
/// identical bytes never collide.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for local lease file names.
    pub const LEASE: Self = Self {
        domain: "plexus-lease-v1",
    };
    /// Hasher for ledger block snapshots.
    pub const BLOCK: Self = Self {
        domain: "plexus-block-v1",
    };
    /// Hasher for leader election scores.
    pub const ELECTION: Self = Self {
        domain: "plexus-election-v1",
    };

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        *hasher.finalize().as_bytes()
    }

    /// Hex-encoded domain-separated hash.
    pub fn hash_hex(&self, data: &[u8]) -> String {
        hex::encode(self.hash(data))
    }

    /// First eight bytes of the hash as a big-endian integer.
    pub fn score(&self, data: &[u8]) -> u64 {
        let digest = self.hash(data);
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(head)
    }
}
