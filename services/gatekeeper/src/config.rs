use crate::chain::StageName;
use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use warden_authz::{MIN_SECRET_LEN, RevocationFailurePolicy, TokenConfig};
use warden_ratelimit::KeyStrategy;

// Gatekeeper configuration sourced from environment variables, optionally
// overridden by a YAML file named in WARDEN_CONFIG.
#[derive(Debug, Clone)]
pub struct GatekeeperConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub token: TokenSettings,
    pub rate_limit: RateLimitSettings,
    pub redis_url: Option<String>,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub cors: CorsConfig,
    pub chain: ChainConfig,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

#[derive(Clone)]
pub struct TokenSettings {
    pub issuer: String,
    // None means a random per-process secret is generated at startup.
    pub secret: Option<String>,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub revocation_failure: RevocationFailurePolicy,
    pub revocation_timeout_ms: u64,
}

impl fmt::Debug for TokenSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSettings")
            .field("issuer", &self.issuer)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("revocation_failure", &self.revocation_failure)
            .field("revocation_timeout_ms", &self.revocation_timeout_ms)
            .finish()
    }
}

impl TokenSettings {
    pub fn token_config(&self, secret: Vec<u8>) -> TokenConfig {
        TokenConfig {
            issuer: self.issuer.clone(),
            secret,
            access_ttl: Duration::from_secs(self.access_ttl_secs),
            refresh_ttl: Duration::from_secs(self.refresh_ttl_secs),
            revocation_failure: self.revocation_failure,
            revocation_timeout: Duration::from_millis(self.revocation_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    // Zero disables limiting.
    pub limit: u32,
    pub window_secs: u64,
    pub key: KeyStrategy,
    pub sweep_interval_secs: u64,
    // Admission calls slower than this fail open.
    pub store_timeout_ms: u64,
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "pg" => Ok(Self::Postgres),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_pg_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_pg_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl fmt::Debug for PostgresConfig {
    // The URL may carry credentials.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_ms", &self.acquire_timeout_ms)
            .finish()
    }
}

fn default_pg_max_connections() -> u32 {
    10
}

fn default_pg_acquire_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    // "*" allows any origin.
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            allowed_headers: vec!["authorization".to_string(), "content-type".to_string()],
            expose_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub order: Vec<StageName>,
    pub exclusions: Vec<RouteExclusion>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            order: StageName::DEFAULT_ORDER.to_vec(),
            exclusions: Vec::new(),
        }
    }
}

/// Stages to skip for requests matching `method` (any when absent) and `path`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteExclusion {
    #[serde(default)]
    pub method: Option<String>,
    pub path: String,
    pub skip: Vec<StageName>,
}

#[derive(Clone, Deserialize)]
pub struct BootstrapAdmin {
    pub username: String,
    pub password: String,
    #[serde(default = "default_admin_display_name")]
    pub display_name: String,
    #[serde(default = "default_admin_role")]
    pub role: String,
}

impl fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("display_name", &self.display_name)
            .field("role", &self.role)
            .finish()
    }
}

fn default_admin_display_name() -> String {
    "Administrator".to_string()
}

fn default_admin_role() -> String {
    "admin".to_string()
}

#[derive(Debug, Default, Deserialize)]
struct GatekeeperConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    token: Option<TokenOverride>,
    rate_limit: Option<RateLimitOverride>,
    redis_url: Option<String>,
    storage: Option<StorageBackend>,
    postgres: Option<PostgresConfig>,
    cors: Option<CorsConfig>,
    chain: Option<ChainConfig>,
    bootstrap_admin: Option<BootstrapAdmin>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenOverride {
    issuer: Option<String>,
    secret: Option<String>,
    access_ttl_secs: Option<u64>,
    refresh_ttl_secs: Option<u64>,
    revocation_failure: Option<RevocationFailurePolicy>,
    revocation_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitOverride {
    limit: Option<u32>,
    window_secs: Option<u64>,
    key: Option<KeyStrategy>,
    sweep_interval_secs: Option<u64>,
    store_timeout_ms: Option<u64>,
}

const DEFAULT_STORE_TIMEOUT_MS: u64 = 250;

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|err| anyhow!("parse {name}: {err}")),
        Err(_) => Ok(default),
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            metrics_bind: SocketAddr::from(([0, 0, 0, 0], 9100)),
            token: TokenSettings {
                issuer: "warden".to_string(),
                secret: None,
                access_ttl_secs: 15 * 60,
                refresh_ttl_secs: 7 * 24 * 3600,
                revocation_failure: RevocationFailurePolicy::Closed,
                revocation_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            },
            rate_limit: RateLimitSettings {
                limit: 100,
                window_secs: 60,
                key: KeyStrategy::Address,
                sweep_interval_secs: 30,
                store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            },
            redis_url: None,
            storage: StorageBackend::Memory,
            postgres: None,
            cors: CorsConfig::default(),
            chain: ChainConfig::default(),
            bootstrap_admin: None,
        }
    }
}

impl GatekeeperConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let token = TokenSettings {
            issuer: env_opt("WARDEN_TOKEN_ISSUER").unwrap_or_else(|| defaults.token.issuer.clone()),
            secret: env_opt("WARDEN_TOKEN_SECRET"),
            access_ttl_secs: env_or("WARDEN_ACCESS_TTL_SECS", defaults.token.access_ttl_secs)?,
            refresh_ttl_secs: env_or("WARDEN_REFRESH_TTL_SECS", defaults.token.refresh_ttl_secs)?,
            revocation_failure: env_or(
                "WARDEN_REVOCATION_FAILURE",
                defaults.token.revocation_failure,
            )?,
            revocation_timeout_ms: env_or(
                "WARDEN_REVOCATION_TIMEOUT_MS",
                defaults.token.revocation_timeout_ms,
            )?,
        };
        let rate_limit = RateLimitSettings {
            limit: env_or("WARDEN_RATE_LIMIT", defaults.rate_limit.limit)?,
            window_secs: env_or("WARDEN_RATE_WINDOW_SECS", defaults.rate_limit.window_secs)?,
            key: env_or("WARDEN_RATE_KEY", defaults.rate_limit.key)?,
            sweep_interval_secs: env_or(
                "WARDEN_RATE_SWEEP_SECS",
                defaults.rate_limit.sweep_interval_secs,
            )?,
            store_timeout_ms: env_or(
                "WARDEN_RATE_STORE_TIMEOUT_MS",
                defaults.rate_limit.store_timeout_ms,
            )?,
        };
        let postgres = env_opt("WARDEN_PG_URL").map(|url| PostgresConfig {
            url,
            max_connections: default_pg_max_connections(),
            acquire_timeout_ms: default_pg_acquire_timeout_ms(),
        });
        let bootstrap_admin = match (
            env_opt("WARDEN_ADMIN_USERNAME"),
            env_opt("WARDEN_ADMIN_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Some(BootstrapAdmin {
                username,
                password,
                display_name: env_opt("WARDEN_ADMIN_DISPLAY_NAME")
                    .unwrap_or_else(default_admin_display_name),
                role: env_opt("WARDEN_ADMIN_ROLE").unwrap_or_else(default_admin_role),
            }),
            (None, None) => None,
            _ => bail!("WARDEN_ADMIN_USERNAME and WARDEN_ADMIN_PASSWORD must be set together"),
        };
        Ok(Self {
            bind_addr: env_or("WARDEN_BIND", defaults.bind_addr)?,
            metrics_bind: env_or("WARDEN_METRICS_BIND", defaults.metrics_bind)?,
            token,
            rate_limit,
            redis_url: env_opt("WARDEN_REDIS_URL"),
            storage: env_or("WARDEN_STORAGE", defaults.storage)?,
            postgres,
            bootstrap_admin,
            ..defaults
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("WARDEN_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read WARDEN_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: GatekeeperConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse gatekeeper config yaml")?;
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(token) = override_cfg.token {
            if let Some(value) = token.issuer {
                self.token.issuer = value;
            }
            if let Some(value) = token.secret {
                self.token.secret = Some(value);
            }
            if let Some(value) = token.access_ttl_secs {
                self.token.access_ttl_secs = value;
            }
            if let Some(value) = token.refresh_ttl_secs {
                self.token.refresh_ttl_secs = value;
            }
            if let Some(value) = token.revocation_failure {
                self.token.revocation_failure = value;
            }
            if let Some(value) = token.revocation_timeout_ms {
                self.token.revocation_timeout_ms = value;
            }
        }
        if let Some(rate) = override_cfg.rate_limit {
            if let Some(value) = rate.limit {
                self.rate_limit.limit = value;
            }
            if let Some(value) = rate.window_secs {
                self.rate_limit.window_secs = value;
            }
            if let Some(value) = rate.key {
                self.rate_limit.key = value;
            }
            if let Some(value) = rate.sweep_interval_secs {
                self.rate_limit.sweep_interval_secs = value;
            }
            if let Some(value) = rate.store_timeout_ms {
                self.rate_limit.store_timeout_ms = value;
            }
        }
        if let Some(value) = override_cfg.redis_url {
            self.redis_url = Some(value);
        }
        if let Some(value) = override_cfg.storage {
            self.storage = value;
        }
        if let Some(value) = override_cfg.postgres {
            self.postgres = Some(value);
        }
        if let Some(value) = override_cfg.cors {
            self.cors = value;
        }
        if let Some(value) = override_cfg.chain {
            self.chain = value;
        }
        if let Some(value) = override_cfg.bootstrap_admin {
            self.bootstrap_admin = Some(value);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.token.access_ttl_secs == 0 {
            bail!("access token lifetime must be non-zero");
        }
        if self.token.refresh_ttl_secs < self.token.access_ttl_secs {
            bail!("refresh token lifetime must not be shorter than the access token lifetime");
        }
        if let Some(secret) = &self.token.secret
            && secret.len() < MIN_SECRET_LEN
        {
            bail!("token secret must be at least {MIN_SECRET_LEN} bytes");
        }
        if self.rate_limit.limit > 0 && self.rate_limit.window_secs == 0 {
            bail!("rate limit window must be non-zero when a limit is set");
        }
        if self.token.revocation_timeout_ms == 0 || self.rate_limit.store_timeout_ms == 0 {
            bail!("store timeouts must be non-zero");
        }
        let mut seen = HashSet::new();
        for stage in &self.chain.order {
            // Authorization reads the identity published by authentication.
            if *stage == StageName::Authz && !seen.contains(&StageName::Authn) {
                bail!("stage authz requires authn earlier in chain order");
            }
            if !seen.insert(*stage) {
                bail!("stage {stage} listed twice in chain order");
            }
        }
        for exclusion in &self.chain.exclusions {
            if !exclusion.path.starts_with('/') {
                bail!("route exclusion path must start with '/': {}", exclusion.path);
            }
            if let Some(method) = &exclusion.method {
                axum::http::Method::from_bytes(method.as_bytes())
                    .with_context(|| format!("parse route exclusion method {method}"))?;
            }
        }
        Ok(())
    }
}
