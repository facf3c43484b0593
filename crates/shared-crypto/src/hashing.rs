//! # BLAKE3 Hashing
//!
//! Content checksums, keyed MACs and key derivation.

use blake3::Hasher;

/// BLAKE3 hash output (256-bit).
pub type Hash = [u8; 32];

/// Stateful BLAKE3 hasher.
pub struct Blake3Hasher {
    inner: Hasher,
}

impl Blake3Hasher {
    pub fn new() -> Self {
        Self {
            inner: Hasher::new(),
        }
    }

    /// Create keyed hasher (for MAC).
    pub fn new_keyed(key: &[u8; 32]) -> Self {
        Self {
            inner: Hasher::new_keyed(key),
        }
    }

    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    /// Feed a length-prefixed field, so `("ab","c")` and `("a","bc")`
    /// hash differently.
    pub fn update_framed(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(&(data.len() as u64).to_le_bytes());
        self.inner.update(data);
        self
    }

    pub fn finalize(&self) -> Hash {
        *self.inner.finalize().as_bytes()
    }

    pub fn finalize_hex(&self) -> String {
        hex::encode(self.finalize())
    }
}

impl Default for Blake3Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash data with BLAKE3 (one-shot).
pub fn blake3_hash(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

/// One-shot hash, hex encoded.
pub fn blake3_hex(data: &[u8]) -> String {
    hex::encode(blake3_hash(data))
}

/// Keyed hash (MAC).
pub fn blake3_keyed_hash(key: &[u8; 32], data: &[u8]) -> Hash {
    *blake3::keyed_hash(key, data).as_bytes()
}

/// Derive key from context and input key material.
pub fn blake3_derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    blake3::derive_key(context, key_material)
}

/// Stretch a passphrase into a 256-bit key by iterated derivation.
///
/// `rounds` of at least 1; each round feeds the salt and previous output.
pub fn stretch_passphrase(context: &str, passphrase: &[u8], salt: &[u8], rounds: u32) -> [u8; 32] {
    let mut hasher = Hasher::new_derive_key(context);
    hasher.update(salt);
    hasher.update(passphrase);
    let mut state = *hasher.finalize().as_bytes();
    for _ in 1..rounds.max(1) {
        let mut hasher = Hasher::new_derive_key(context);
        hasher.update(salt);
        hasher.update(&state);
        state = *hasher.finalize().as_bytes();
    }
    state
}

/// Digest of an ordered sequence of `(key, value)` pairs.
///
/// The empty sequence has a fixed, non-zero digest.
pub fn digest_entries<'a, I>(entries: I) -> Hash
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
{
    let mut hasher = Blake3Hasher::new();
    hasher.update(b"hearth/entries/v1");
    for (key, value) in entries {
        hasher.update_framed(key).update_framed(value);
    }
    hasher.finalize()
}
