//! # Shared Crypto - Kernel Cryptographic Primitives
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `symmetric` | XChaCha20-Poly1305 | Store records, journal, key wrapping |
//! | `hashing` | BLAKE3 | Store checksums, manifests, key derivation |
//! | `signatures` | Ed25519 | Device identity, relay bearer tokens |
//!
//! ## Security Properties
//!
//! - **XChaCha20**: 192-bit random nonces, associated data binds location
//! - **Ed25519**: Deterministic nonces, no RNG dependency when signing
//! - **Key material**: zeroized on drop, redacted in `Debug`

#![warn(clippy::all)]

pub mod errors;
pub mod hashing;
pub mod signatures;
pub mod symmetric;

// Re-exports
pub use errors::CryptoError;
pub use hashing::{blake3_hash, blake3_hex, digest_entries, stretch_passphrase, Blake3Hasher};
pub use signatures::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
pub use symmetric::{open, seal, unwrap_key, wrap_key, Nonce, SecretKey};
