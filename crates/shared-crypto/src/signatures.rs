//! # Ed25519 Signatures
//!
//! Device identity keys. The relay token provider signs bearer tokens with
//! the device key; the relay verifies them with the published public key.
//!
//! The wrapped `SigningKey` wipes itself on drop.

use crate::CryptoError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Verifying half of a device key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ed25519PublicKey(VerifyingKey);

impl Ed25519PublicKey {
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), CryptoError> {
        self.0
            .verify(message, &signature.0)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

/// Detached signature over a token body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ed25519Signature(Signature);

impl Ed25519Signature {
    /// Parse the 64-byte wire form.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        Signature::from_slice(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidSignatureFormat)
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }
}

/// A device's signing identity.
pub struct Ed25519KeyPair(SigningKey);

impl Ed25519KeyPair {
    #[must_use]
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut rand::thread_rng()))
    }

    /// Rebuild a key persisted with [`Ed25519KeyPair::to_seed`].
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self(SigningKey::from_bytes(&seed))
    }

    #[must_use]
    pub fn to_seed(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    #[must_use]
    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.0.verifying_key())
    }

    /// Ed25519 nonces are derived from the key and message, so equal
    /// inputs give equal signatures.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.0.sign(message))
    }
}
