//! Cryptographic primitives for Plexus.
//!
//! Provides domain-separated BLAKE3 hashing (used for content-addressed local
//! state such as lease files and block hashes) and the AES-256-GCM [`Sealer`]
//! that protects ledger traffic in transit.
//!
//! All crypto operations wrap established libraries; there is no custom
//! cryptography.

pub mod hasher;
pub mod sealer;

pub use hasher::ContentHasher;
pub use sealer::{AesSealer, SealError, Sealer};
