//! Gatekeeper HTTP application wiring.
//!
//! # Purpose
//! Builds the shared application state from configuration, composes the
//! router with the gatekeeper chain, and runs the background sweeper.
//!
//! # Notes
//! Layer order, outermost first: panic boundary, HTTP trace span, gatekeeper
//! chain, handler.
use crate::accounts::{Account, AccountDirectory, MemoryAccountDirectory};
use crate::api;
use crate::chain::routes::{HEALTH_PATH, LOGIN_PATH, LOGOUT_PATH, ME_PATH, REFRESH_PATH};
use crate::chain::{self, Chain, StageDeps, panic};
use crate::config::{BootstrapAdmin, GatekeeperConfig};
use crate::store;
use anyhow::{Context, Result};
use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post};
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use warden_authz::{
    MemoryRevocationStore, PolicyEngine, PolicyRule, PolicyStore, RedisRevocationStore,
    RevocationStore, TokenService,
};
use warden_common::{Clock, SystemClock};
use warden_ratelimit::{MemoryWindowStore, RateLimiter, RedisWindowStore, WindowStore};

const REDIS_PREFIX: &str = "warden";

pub const ROLES_PATH: &str = "/api/v1/roles";
pub const ROLE_PATH: &str = "/api/v1/roles/:role";
pub const ROLE_POLICIES_PATH: &str = "/api/v1/roles/:role/policies";
pub const ROLE_PARENTS_PATH: &str = "/api/v1/roles/:role/parents";
pub const ROLE_PARENT_PATH: &str = "/api/v1/roles/:role/parents/:parent";
pub const POLICIES_PATH: &str = "/api/v1/policies";

/// Grants seeded for the bootstrap administrator's role. Route templates use
/// the same `:name` syntax as policy resources.
pub const ADMIN_GRANTS: [(&str, &str); 9] = [
    (ROLES_PATH, "GET"),
    (ROLES_PATH, "POST"),
    (ROLE_PATH, "DELETE"),
    (ROLE_POLICIES_PATH, "GET"),
    (ROLE_POLICIES_PATH, "PUT"),
    (ROLE_PARENTS_PATH, "POST"),
    (ROLE_PARENT_PATH, "DELETE"),
    (POLICIES_PATH, "POST"),
    (POLICIES_PATH, "DELETE"),
];

#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub policies: Arc<PolicyEngine>,
    pub limiter: Arc<RateLimiter>,
    pub accounts: Arc<dyn AccountDirectory>,
    pub chain: Arc<Chain>,
    // Present only when revocations live in process memory.
    pub memory_revocations: Option<Arc<MemoryRevocationStore>>,
    pub sweep_interval: Duration,
}

pub async fn build_state(config: &GatekeeperConfig) -> Result<AppState> {
    let policy_store = store::open_policy_store(config).await?;
    build_state_with(config, Arc::new(SystemClock), policy_store).await
}

/// Assemble the state from an explicit clock and policy store.
pub async fn build_state_with(
    config: &GatekeeperConfig,
    clock: Arc<dyn Clock>,
    policy_store: Arc<dyn PolicyStore>,
) -> Result<AppState> {
    let (revocations, memory_revocations, windows) = match &config.redis_url {
        Some(url) => {
            let revocations: Arc<dyn RevocationStore> = Arc::new(
                RedisRevocationStore::connect(url, REDIS_PREFIX)
                    .await
                    .context("connect revocation store")?,
            );
            let windows: Arc<dyn WindowStore> = Arc::new(
                RedisWindowStore::connect(url, REDIS_PREFIX)
                    .await
                    .context("connect rate limit store")?,
            );
            (revocations, None, windows)
        }
        None => {
            let memory = Arc::new(MemoryRevocationStore::new(clock.clone()));
            let revocations: Arc<dyn RevocationStore> = memory.clone();
            let windows: Arc<dyn WindowStore> = Arc::new(MemoryWindowStore::new());
            (revocations, Some(memory), windows)
        }
    };

    let secret = match &config.token.secret {
        Some(secret) => secret.as_bytes().to_vec(),
        None => {
            tracing::warn!(
                "no token secret configured; generated a per-process secret, tokens will not survive a restart"
            );
            generate_secret()
        }
    };
    let tokens = Arc::new(
        TokenService::new(config.token.token_config(secret), clock.clone(), revocations)
            .context("build token service")?,
    );
    let policies = Arc::new(
        PolicyEngine::load(policy_store)
            .await
            .context("load policies")?,
    );
    let limiter = Arc::new(
        RateLimiter::new(windows, clock).with_store_timeout(config.rate_limit.store_timeout()),
    );

    let accounts = MemoryAccountDirectory::new();
    if let Some(admin) = &config.bootstrap_admin {
        seed_admin(&accounts, &policies, admin).await?;
    }

    let chain = Arc::new(Chain::build(
        config,
        StageDeps {
            tokens: tokens.clone(),
            policies: policies.clone(),
            limiter: limiter.clone(),
        },
    )?);

    tracing::info!(
        revocation_backend = tokens.revocation_backend(),
        rate_limit_backend = limiter.backend_name(),
        "gatekeeper state built"
    );
    Ok(AppState {
        tokens,
        policies,
        limiter,
        accounts: Arc::new(accounts),
        chain,
        memory_revocations,
        sweep_interval: Duration::from_secs(config.rate_limit.sweep_interval_secs.max(1)),
    })
}

fn generate_secret() -> Vec<u8> {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes).into_bytes()
}

pub fn admin_rules(role: &str) -> Vec<PolicyRule> {
    ADMIN_GRANTS
        .iter()
        .map(|(resource, action)| PolicyRule::new(role, *resource, *action))
        .collect()
}

async fn seed_admin(
    accounts: &MemoryAccountDirectory,
    policies: &PolicyEngine,
    admin: &BootstrapAdmin,
) -> Result<()> {
    accounts
        .insert(
            Account {
                id: admin.username.clone(),
                username: admin.username.clone(),
                display_name: admin.display_name.clone(),
                role: admin.role.clone(),
            },
            &admin.password,
        )
        .await
        .context("seed bootstrap admin")?;
    // Stored grants win over the seed once an operator has edited them.
    if policies.get_policies_for_role(&admin.role).is_empty() {
        policies
            .replace_policies_for_role(&admin.role, admin_rules(&admin.role))
            .await
            .context("seed admin grants")?;
        tracing::info!(role = %admin.role, "seeded admin grants");
    }
    Ok(())
}

/// Every route the gatekeeper serves, without layers.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(HEALTH_PATH, get(api::system::health))
        .route(LOGIN_PATH, post(api::auth::login))
        .route(REFRESH_PATH, post(api::auth::refresh))
        .route(LOGOUT_PATH, post(api::auth::logout))
        .route(ME_PATH, get(api::auth::me))
        .route(
            ROLES_PATH,
            get(api::policies::list_roles).post(api::policies::create_role),
        )
        .route(ROLE_PATH, delete(api::policies::delete_role))
        .route(
            ROLE_POLICIES_PATH,
            get(api::policies::get_role_policies).put(api::policies::replace_role_policies),
        )
        .route(ROLE_PARENTS_PATH, post(api::policies::add_parent))
        .route(ROLE_PARENT_PATH, delete(api::policies::remove_parent))
        .route(
            POLICIES_PATH,
            post(api::policies::add_policy).delete(api::policies::remove_policy),
        )
}

/// Wrap `routes` in the gatekeeper chain, the trace span and the panic
/// boundary.
pub fn with_layers(routes: Router<AppState>, state: AppState) -> Router {
    routes
        .layer(middleware::from_fn_with_state(
            state.chain.clone(),
            chain::gate,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(panic::panic_boundary())
        .with_state(state)
}

pub fn build_router(state: AppState) -> Router {
    with_layers(api_routes(), state)
}

/// Periodically drop idle rate windows and expired in-memory revocations.
pub fn spawn_sweeper(state: &AppState) -> tokio::task::JoinHandle<()> {
    let limiter = state.limiter.clone();
    let revocations = state.memory_revocations.clone();
    let period = state.sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let windows = limiter.prune_idle().await;
            let revoked = revocations
                .as_ref()
                .map(|store| store.purge_expired())
                .unwrap_or(0);
            if windows > 0 || revoked > 0 {
                tracing::debug!(windows, revoked, "sweeper pruned state");
            }
        }
    })
}
