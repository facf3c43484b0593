//! Key vault: the store key wrapped under a passphrase-derived master key.
//!
//! ```text
//! passphrase ──stretch(salt, rounds)──→ master key ──unwrap──→ store key
//! ```
//!
//! The store key never leaves memory unwrapped and is zeroized on lock.

use shared_crypto::{stretch_passphrase, unwrap_key, wrap_key, SecretKey};
use shared_types::Credential;

use crate::domain::{StoreError, StoreResult, VaultRecord};

const MASTER_KEY_CONTEXT: &str = "hearth 2024 control-store master key";
const VAULT_VERSION: u8 = 1;
const SALT_LEN: usize = 16;

pub struct KeyVault;

impl KeyVault {
    /// Create a vault for a fresh store. Returns the header and the new
    /// store key.
    pub fn initialize(passphrase: &Credential, rounds: u32) -> StoreResult<(VaultRecord, SecretKey)> {
        let mut salt = [0u8; SALT_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut salt);

        let master = Self::master_key(passphrase, &salt, rounds);
        let store_key = SecretKey::generate();
        let wrapped = wrap_key(&master, &store_key)?;

        let record = VaultRecord {
            version: VAULT_VERSION,
            salt: hex::encode(salt),
            rounds,
            wrapped_key: hex::encode(wrapped),
        };
        Ok((record, store_key))
    }

    /// Recover the store key. A wrong passphrase yields `BadCredential`.
    pub fn open(record: &VaultRecord, passphrase: &Credential) -> StoreResult<SecretKey> {
        if record.version != VAULT_VERSION {
            return Err(StoreError::Serialization(format!(
                "unsupported vault version {}",
                record.version
            )));
        }
        let salt = hex::decode(&record.salt).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let wrapped = hex::decode(&record.wrapped_key)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let master = Self::master_key(passphrase, &salt, record.rounds);
        unwrap_key(&master, &wrapped).map_err(|_| StoreError::BadCredential)
    }

    fn master_key(passphrase: &Credential, salt: &[u8], rounds: u32) -> SecretKey {
        SecretKey::from_bytes(stretch_passphrase(
            MASTER_KEY_CONTEXT,
            passphrase.expose(),
            salt,
            rounds,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_with_same_passphrase() {
        let pass = Credential::new("correct horse");
        let (record, key) = KeyVault::initialize(&pass, 3).unwrap();
        let reopened = KeyVault::open(&record, &pass).unwrap();
        assert_eq!(reopened, key);
    }

    #[test]
    fn test_wrong_passphrase_rejected() {
        let (record, _) = KeyVault::initialize(&Credential::new("right"), 3).unwrap();
        assert_eq!(
            KeyVault::open(&record, &Credential::new("wrong")).unwrap_err(),
            StoreError::BadCredential
        );
    }

    #[test]
    fn test_salt_differs_per_vault() {
        let pass = Credential::new("same");
        let (a, _) = KeyVault::initialize(&pass, 1).unwrap();
        let (b, _) = KeyVault::initialize(&pass, 1).unwrap();
        assert_ne!(a.salt, b.salt);
    }
}
