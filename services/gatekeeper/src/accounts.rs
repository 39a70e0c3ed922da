//! Credential verification seam.
//!
//! Account management belongs to the back-office; the gatekeeper only needs to
//! turn a username and password into an identity at login.
use anyhow::{Result, anyhow};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use password_hash::{PasswordHash, SaltString};
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::RwLock;
use warden_common::Identity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub role: String,
}

impl Account {
    pub fn identity(&self) -> warden_common::Result<Identity> {
        Identity::new(&self.id, &self.display_name, &self.role)
    }
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// The account for these credentials, or `None` if they do not match.
    async fn verify(&self, username: &str, password: &str) -> Option<Account>;
}

struct StoredAccount {
    account: Account,
    password_hash: String,
}

/// Accounts held in memory with Argon2 password hashes.
#[derive(Default)]
pub struct MemoryAccountDirectory {
    accounts: RwLock<HashMap<String, StoredAccount>>,
}

impl MemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, account: Account, password: &str) -> Result<()> {
        let password_hash = hash_password(password)?;
        self.accounts.write().await.insert(
            account.username.clone(),
            StoredAccount {
                account,
                password_hash,
            },
        );
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }
}

#[async_trait]
impl AccountDirectory for MemoryAccountDirectory {
    async fn verify(&self, username: &str, password: &str) -> Option<Account> {
        let accounts = self.accounts.read().await;
        let Some(stored) = accounts.get(username) else {
            // Pay the same Argon2 cost as a known username.
            verify_password(unknown_account_hash(), password);
            return None;
        };
        verify_password(&stored.password_hash, password).then(|| stored.account.clone())
    }
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!(e.to_string()))?
        .to_string();
    Ok(phc)
}

fn unknown_account_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| hash_password("warden-unknown-account").unwrap_or_default())
}

fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
