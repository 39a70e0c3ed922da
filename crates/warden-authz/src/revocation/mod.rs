//! Shared revocation storage.
//!
//! Entries are keyed by a digest of the token, never the raw token, and expire
//! on their own once the token would have expired anyway.
mod memory;
mod redis;

pub use memory::MemoryRevocationStore;
pub use self::redis::RedisRevocationStore;

use crate::RevocationStoreError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

const KEY_PREFIX: &str = "revoked:";

#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Record a revocation that disappears after `ttl`.
    async fn revoke(&self, key: &str, ttl: Duration) -> Result<(), RevocationStoreError>;
    async fn is_revoked(&self, key: &str) -> Result<bool, RevocationStoreError>;
    fn backend_name(&self) -> &'static str;
}

pub fn revocation_key(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{KEY_PREFIX}{}", hex::encode(digest))
}
