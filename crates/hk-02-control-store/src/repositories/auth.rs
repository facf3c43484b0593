use serde::{Deserialize, Serialize};
use rand::RngCore;
use shared_crypto::stretch_passphrase;

use super::Table;
use crate::domain::{CommitReceipt, StoreError, StoreResult};
use crate::service::ControlStore;

const PASSWORD_CONTEXT: &str = "hearth 2024 portal password";
const PASSWORD_ROUNDS: u32 = 1_000;

/// Local portal account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub salt: String,
    pub password_hash: String,
    pub created_at: u64,
    #[serde(default)]
    pub admin: bool,
}

/// Portal accounts and password verification.
#[derive(Clone)]
pub struct AuthRepository {
    table: Table<UserRecord>,
}

impl AuthRepository {
    pub const TABLE: &'static str = "auth";

    pub fn new(store: ControlStore) -> Self {
        Self {
            table: Table::new(store, Self::TABLE),
        }
    }

    pub async fn create_user(&self, username: &str, password: &str, admin: bool) -> StoreResult<CommitReceipt> {
        if self.table.get(username)?.is_some() {
            return Err(StoreError::Conflict(format!("user {username} exists")));
        }
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        let record = UserRecord {
            username: username.to_string(),
            password_hash: hash_password(password, &salt),
            salt,
            created_at: shared_types::unix_now(),
            admin,
        };
        self.table.put(username, &record).await
    }

    /// Whether `password` matches the stored hash. Unknown users fail.
    pub fn verify_password(&self, username: &str, password: &str) -> StoreResult<bool> {
        Ok(self
            .table
            .get(username)?
            .is_some_and(|user| hash_password(password, &user.salt) == user.password_hash))
    }

    pub fn get(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        self.table.get(username)
    }

    pub fn list(&self) -> StoreResult<Vec<UserRecord>> {
        Ok(self.table.list()?.into_iter().map(|(_, user)| user).collect())
    }

    pub async fn delete_user(&self, username: &str) -> StoreResult<CommitReceipt> {
        self.table.delete(username).await
    }
}

fn hash_password(password: &str, salt: &str) -> String {
    hex::encode(stretch_passphrase(
        PASSWORD_CONTEXT,
        password.as_bytes(),
        salt.as_bytes(),
        PASSWORD_ROUNDS,
    ))
}
