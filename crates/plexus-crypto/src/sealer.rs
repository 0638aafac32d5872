use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

/// Nonce length for AES-GCM (96 bits).
pub const NONCE_LEN: usize = 12;
/// Authentication tag length for AES-GCM (128 bits).
pub const TAG_LEN: usize = 16;

const KEY_CONTEXT: &str = "plexus 2024-05-01 sealer key v1";

/// Symmetric authenticated encryption of small payloads.
///
/// Tokens are opaque strings. Every call to [`Sealer::seal`] draws fresh
/// randomness, so sealing the same plaintext twice yields different tokens of
/// the same length.
pub trait Sealer: Send + Sync {
    fn seal(&self, plaintext: &[u8], key: &str) -> Result<String, SealError>;
    fn unseal(&self, token: &str, key: &str) -> Result<Vec<u8>, SealError>;
}

/// AES-256-GCM sealer.
///
/// The 256-bit cipher key is derived from the passphrase with BLAKE3 in
/// key-derivation mode. Token layout is lowercase hex of
/// `nonce (12) || ciphertext (n) || tag (16)`, so a token is always
/// `2 * (n + 28)` characters long.
#[derive(Clone, Copy, Debug, Default)]
pub struct AesSealer;

impl AesSealer {
    pub fn new() -> Self {
        Self
    }

    /// Length of the token produced for a plaintext of `plaintext_len` bytes.
    pub const fn token_len(plaintext_len: usize) -> usize {
        2 * (NONCE_LEN + plaintext_len + TAG_LEN)
    }

    fn cipher(key: &str) -> Aes256Gcm {
        let derived = blake3::derive_key(KEY_CONTEXT, key.as_bytes());
        Aes256Gcm::new(&derived.into())
    }
}

impl Sealer for AesSealer {
    fn seal(&self, plaintext: &[u8], key: &str) -> Result<String, SealError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = Self::cipher(key)
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| SealError::Encryption)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(hex::encode(out))
    }

    fn unseal(&self, token: &str, key: &str) -> Result<Vec<u8>, SealError> {
        let raw = hex::decode(token).map_err(|e| SealError::InvalidToken(e.to_string()))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(SealError::TooShort {
                minimum: NONCE_LEN + TAG_LEN,
                actual: raw.len(),
            });
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        Self::cipher(key)
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| SealError::Authentication)
    }
}

/// Errors from sealing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SealError {
    #[error("encryption failed")]
    Encryption,
    #[error("token is not valid hex: {0}")]
    InvalidToken(String),
    #[error("token too short: expected at least {minimum} bytes, got {actual}")]
    TooShort { minimum: usize, actual: usize },
    #[error("authentication failed: wrong key or tampered token")]
    Authentication,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: &str = "Jd8sPcNq2Lx7Vw0Rt5Yb9Hm3Kf6Gz1Ae";

    #[test]
    fn encode_decode() {
        let s = AesSealer::new();
        let message = b"foo";

        let encoded = s.seal(message, KEY).unwrap();
        assert_ne!(encoded, KEY);
        assert_eq!(encoded.len(), 62);

        let encoded2 = s.seal(message, KEY).unwrap();
        assert_ne!(encoded2, encoded);
        assert_eq!(encoded2.len(), encoded.len());

        assert_eq!(s.unseal(&encoded, KEY).unwrap(), message);
        assert_eq!(s.unseal(&encoded2, KEY).unwrap(), message);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let s = AesSealer::new();
        let token = s.seal(b"secret payload", KEY).unwrap();
        assert_eq!(
            s.unseal(&token, "another key entirely"),
            Err(SealError::Authentication)
        );
    }

    #[test]
    fn tampered_token_fails_authentication() {
        let s = AesSealer::new();
        let token = s.seal(b"secret payload", KEY).unwrap();
        let mut bytes = hex::decode(&token).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert_eq!(
            s.unseal(&hex::encode(bytes), KEY),
            Err(SealError::Authentication)
        );
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let s = AesSealer::new();
        assert!(matches!(s.unseal("zz", KEY), Err(SealError::InvalidToken(_))));
        assert!(matches!(
            s.unseal("00ff", KEY),
            Err(SealError::TooShort { actual: 2, .. })
        ));
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let s = AesSealer::new();
        let token = s.seal(b"", KEY).unwrap();
        assert_eq!(token.len(), AesSealer::token_len(0));
        assert!(s.unseal(&token, KEY).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn seal_unseal_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..512), key in ".{1,64}") {
            let s = AesSealer::new();
            let token = s.seal(&plaintext, &key).unwrap();
            prop_assert_eq!(token.len(), AesSealer::token_len(plaintext.len()));
            prop_assert_eq!(s.unseal(&token, &key).unwrap(), plaintext);
        }
    }
}
