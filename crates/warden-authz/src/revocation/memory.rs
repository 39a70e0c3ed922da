use super::RevocationStore;
use crate::RevocationStoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use warden_common::{Clock, SystemClock};

/// Single-process revocation store. Entries hold their expiry in epoch
/// milliseconds and are treated as absent once the clock passes it.
pub struct MemoryRevocationStore {
    entries: DashMap<String, i64>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryRevocationStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryRevocationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn revoke(&self, key: &str, ttl: Duration) -> Result<(), RevocationStoreError> {
        let expires_at = self
            .clock
            .now_millis()
            .saturating_add(ttl.as_millis() as i64);
        self.entries
            .entry(key.to_string())
            .and_modify(|current| *current = (*current).max(expires_at))
            .or_insert(expires_at);
        Ok(())
    }

    async fn is_revoked(&self, key: &str) -> Result<bool, RevocationStoreError> {
        let now = self.clock.now_millis();
        Ok(self
            .entries
            .get(key)
            .is_some_and(|expires_at| *expires_at > now))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_common::ManualClock;

    #[tokio::test]
    async fn entries_expire_with_ttl() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = MemoryRevocationStore::new(clock.clone());
        store
            .revoke("revoked:abc", Duration::from_secs(5))
            .await
            .expect("revoke");
        assert!(store.is_revoked("revoked:abc").await.expect("lookup"));
        assert!(!store.is_revoked("revoked:def").await.expect("lookup"));

        clock.advance(Duration::from_secs(5));
        assert!(!store.is_revoked("revoked:abc").await.expect("lookup"));
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn re_revoking_never_shortens_ttl() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MemoryRevocationStore::new(clock.clone());
        store
            .revoke("k", Duration::from_secs(60))
            .await
            .expect("revoke");
        store
            .revoke("k", Duration::from_secs(1))
            .await
            .expect("revoke");
        clock.advance(Duration::from_secs(30));
        assert!(store.is_revoked("k").await.expect("lookup"));
        assert_eq!(store.len(), 1);
    }
}
