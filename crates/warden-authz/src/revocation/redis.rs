use super::RevocationStore;
use crate::RevocationStoreError;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;

/// Revocation entries shared across gatekeeper instances through Redis.
/// Each entry is a plain key with a millisecond expiry.
#[derive(Clone)]
pub struct RedisRevocationStore {
    manager: ConnectionManager,
    prefix: Arc<String>,
}

impl RedisRevocationStore {
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, RevocationStoreError> {
        let client = redis::Client::open(url)
            .map_err(|err| RevocationStoreError(format!("redis client: {err}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| RevocationStoreError(format!("redis connect: {err}")))?;
        Ok(Self::from_manager(manager, prefix))
    }

    pub fn from_manager(manager: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            manager,
            prefix: Arc::new(prefix.into()),
        }
    }

    fn namespaced_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{key}", self.prefix)
        }
    }
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn revoke(&self, key: &str, ttl: Duration) -> Result<(), RevocationStoreError> {
        // PX rejects zero.
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(self.namespaced_key(key))
            .arg(1u8)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|err| RevocationStoreError(format!("redis set: {err}")))?;
        Ok(())
    }

    async fn is_revoked(&self, key: &str) -> Result<bool, RevocationStoreError> {
        let mut conn = self.manager.clone();
        let exists: bool = conn
            .exists(self.namespaced_key(key))
            .await
            .map_err(|err| RevocationStoreError(format!("redis exists: {err}")))?;
        Ok(exists)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
