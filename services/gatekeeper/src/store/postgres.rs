//! Postgres-backed policy store.
//!
//! # What this module is
//! Durable home of roles, policy rules and inheritance edges, shared by every
//! gatekeeper instance. Rules are loaded once at startup into the policy
//! engine; mutations are written here before the engine publishes them.
//!
//! # Key invariants
//! - A rule or an edge can only reference a registered role; inserting either
//!   registers the roles it names in the same transaction.
//! - Replacing a role's rules deletes and inserts inside one transaction, so a
//!   concurrent reader of the tables never sees the role empty.
//! - Deleting a role cascades to its rules and every edge naming it.
//!
//! # Security notes
//! - The connection URL may contain credentials; it is never logged.
use crate::config::PostgresConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;
use std::time::Duration;
use warden_authz::{
    InheritanceEdge, PolicyError, PolicyResult, PolicyRule, PolicySet, PolicyStore,
};

#[derive(Clone)]
pub struct PostgresPolicyStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct DbRule {
    role: String,
    resource: String,
    action: String,
}

#[derive(FromRow)]
struct DbEdge {
    child: String,
    parent: String,
}

fn store_err(err: sqlx::Error) -> PolicyError {
    PolicyError::Store(err.to_string())
}

async fn ensure_role(tx: &mut Transaction<'_, Postgres>, role: &str) -> PolicyResult<()> {
    sqlx::query("INSERT INTO roles (name) VALUES ($1) ON CONFLICT DO NOTHING")
        .bind(role)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
    Ok(())
}

impl PostgresPolicyStore {
    /// Connect, then apply migrations before any rule is read.
    pub async fn connect(pg: &PostgresConfig) -> Result<Self> {
        let store = Self::connect_without_migrations(pg).await?;
        sqlx::migrate!("./migrations")
            .run(&store.pool)
            .await
            .context("run policy migrations")?;
        Ok(store)
    }

    pub async fn connect_without_migrations(pg: &PostgresConfig) -> Result<Self> {
        let options = PgConnectOptions::from_str(&pg.url).context("parse postgres url")?;
        let pool = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(options)
            .await
            .context("connect to postgres")?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyStore for PostgresPolicyStore {
    async fn load(&self) -> PolicyResult<PolicySet> {
        let roles: Vec<(String,)> = sqlx::query_as("SELECT name FROM roles ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        let rules = sqlx::query_as::<_, DbRule>(
            "SELECT role, resource, action FROM policy_rules ORDER BY role, resource, action",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        let edges = sqlx::query_as::<_, DbEdge>(
            "SELECT child, parent FROM role_inheritance ORDER BY child, parent",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(PolicySet {
            roles: roles.into_iter().map(|(name,)| name).collect(),
            rules: rules
                .into_iter()
                .map(|row| PolicyRule::new(row.role, row.resource, row.action))
                .collect(),
            inheritance: edges
                .into_iter()
                .map(|row| InheritanceEdge::new(row.child, row.parent))
                .collect(),
        })
    }

    async fn add_rule(&self, rule: &PolicyRule) -> PolicyResult<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        ensure_role(&mut tx, &rule.role).await?;
        sqlx::query(
            "INSERT INTO policy_rules (role, resource, action) VALUES ($1, $2, $3) \
             ON CONFLICT DO NOTHING",
        )
        .bind(&rule.role)
        .bind(&rule.resource)
        .bind(&rule.action)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;
        tx.commit().await.map_err(store_err)
    }

    async fn remove_rule(&self, rule: &PolicyRule) -> PolicyResult<()> {
        sqlx::query("DELETE FROM policy_rules WHERE role = $1 AND resource = $2 AND action = $3")
            .bind(&rule.role)
            .bind(&rule.resource)
            .bind(&rule.action)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn replace_rules_for_role(&self, role: &str, rules: &[PolicyRule]) -> PolicyResult<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        ensure_role(&mut tx, role).await?;
        sqlx::query("DELETE FROM policy_rules WHERE role = $1")
            .bind(role)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        for rule in rules {
            sqlx::query(
                "INSERT INTO policy_rules (role, resource, action) VALUES ($1, $2, $3) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(role)
            .bind(&rule.resource)
            .bind(&rule.action)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)
    }

    async fn add_edge(&self, edge: &InheritanceEdge) -> PolicyResult<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        ensure_role(&mut tx, &edge.child).await?;
        ensure_role(&mut tx, &edge.parent).await?;
        sqlx::query(
            "INSERT INTO role_inheritance (child, parent) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(&edge.child)
        .bind(&edge.parent)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;
        tx.commit().await.map_err(store_err)
    }

    async fn remove_edge(&self, edge: &InheritanceEdge) -> PolicyResult<()> {
        sqlx::query("DELETE FROM role_inheritance WHERE child = $1 AND parent = $2")
            .bind(&edge.child)
            .bind(&edge.parent)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn add_role(&self, role: &str) -> PolicyResult<()> {
        sqlx::query("INSERT INTO roles (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(role)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn remove_role(&self, role: &str) -> PolicyResult<()> {
        // Rules and edges go with the role through ON DELETE CASCADE.
        sqlx::query("DELETE FROM roles WHERE name = $1")
            .bind(role)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
