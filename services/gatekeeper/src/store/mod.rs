//! Durable policy storage selection.
//!
//! The in-memory store ships with `warden-authz`; this module adds the
//! Postgres backend and picks one from configuration at startup.
pub mod postgres;

use crate::config::{GatekeeperConfig, StorageBackend};
use anyhow::{Result, anyhow};
use std::sync::Arc;
use warden_authz::{MemoryPolicyStore, PolicyStore};

pub use postgres::PostgresPolicyStore;

pub async fn open_policy_store(config: &GatekeeperConfig) -> Result<Arc<dyn PolicyStore>> {
    match config.storage {
        StorageBackend::Memory => Ok(Arc::new(MemoryPolicyStore::new())),
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .ok_or_else(|| anyhow!("postgres configuration missing"))?;
            Ok(Arc::new(PostgresPolicyStore::connect(pg).await?))
        }
    }
}
