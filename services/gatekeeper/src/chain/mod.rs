//! Gatekeeper request chain.
//!
//! # Purpose
//! Runs every inbound request through an ordered list of stages before it
//! reaches a handler: cross-origin handling, rate limiting, request logging,
//! authentication and authorization.
//!
//! # How it fits
//! `Chain::build` turns configuration into stages plus a route table; `gate` is
//! installed as axum middleware in front of every route. The panic boundary is
//! a separate layer outside the chain (see `panic`).
//!
//! # Key invariants
//! - Stages run in configured order; the first rejection ends the pre-phase and
//!   the handler never runs.
//! - Post-phases run in reverse order for every stage whose pre-phase ran,
//!   including the one that rejected, so the chain nests like wrapped services.
//! - Skipped stages are decided once per request from the route table.
//! - Authorization runs only with an identity published by authentication.
pub mod panic;
pub mod routes;
pub mod stages;

use crate::api::error::{api_forbidden, api_unauthorized, rate_limited_response};
use crate::config::GatekeeperConfig;
use anyhow::Result;
use async_trait::async_trait;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use warden_authz::{PolicyEngine, TokenService};
use warden_common::Identity;
use warden_ratelimit::RateLimiter;

pub use routes::RouteTable;

/// Identifier of a chain stage, as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Cors,
    RateLimit,
    RequestLog,
    Authn,
    Authz,
}

impl StageName {
    /// Order used when configuration does not name one.
    pub const DEFAULT_ORDER: [StageName; 5] = [
        StageName::Cors,
        StageName::RateLimit,
        StageName::RequestLog,
        StageName::Authn,
        StageName::Authz,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Cors => "cors",
            StageName::RateLimit => "rate_limit",
            StageName::RequestLog => "request_log",
            StageName::Authn => "authn",
            StageName::Authz => "authz",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        StageName::DEFAULT_ORDER
            .into_iter()
            .find(|stage| stage.as_str() == value.trim())
            .ok_or_else(|| format!("unknown stage: {value}"))
    }
}

/// Per-request state shared by the stages.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub client_addr: Option<SocketAddr>,
    pub origin: Option<String>,
    pub identity: Option<Identity>,
    pub started: Instant,
}

impl RequestContext {
    /// Capture method, path, peer address and `Origin` before any stage
    /// runs. `identity` starts empty and is filled by authentication.
    pub fn from_request(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            client_addr: request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
            origin: request
                .headers()
                .get(header::ORIGIN)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
            identity: None,
            started: Instant::now(),
        }
    }
}

/// Why a stage refused to let a request through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    Unauthenticated(&'static str),
    Forbidden,
    RateLimited { retry_after: Duration },
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        match self {
            GateRejection::Unauthenticated(message) => api_unauthorized(message).into_response(),
            GateRejection::Forbidden => api_forbidden().into_response(),
            GateRejection::RateLimited { retry_after } => rate_limited_response(retry_after),
        }
    }
}

/// What a stage decided in its `before` hook.
pub enum StageOutcome {
    Continue,
    Reject(GateRejection),
    /// Answer the request directly without it being an error (CORS preflight).
    Respond(Response),
}

#[async_trait]
/// One step of the gatekeeper chain.
///
/// # What it does
/// `before` runs in chain order on the way in and may stop the request.
/// `after` runs in reverse order on the way out, only for stages whose
/// `before` was entered.
///
/// # Invariants
/// - `before` must not panic; a panic is caught by the outer boundary and
///   answered as an internal error.
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    async fn before(&self, ctx: &mut RequestContext, request: &mut Request) -> StageOutcome;

    fn after(&self, _ctx: &RequestContext, _response: &mut Response) {}
}

/// Collaborators the stages are built from.
#[derive(Clone)]
pub struct StageDeps {
    pub tokens: Arc<TokenService>,
    pub policies: Arc<PolicyEngine>,
    pub limiter: Arc<RateLimiter>,
}

/// The configured stage sequence plus its per-route exclusions.
pub struct Chain {
    stages: Vec<Arc<dyn Stage>>,
    routes: RouteTable,
}

impl Chain {
    pub fn new(stages: Vec<Arc<dyn Stage>>, routes: RouteTable) -> Self {
        Self { stages, routes }
    }

    /// Instantiate the stages named by `config.chain.order`.
    ///
    /// # Errors
    /// - Invalid CORS settings.
    /// - Route exclusions with a bad method or pattern.
    pub fn build(config: &GatekeeperConfig, deps: StageDeps) -> Result<Self> {
        let mut built: Vec<Arc<dyn Stage>> = Vec::with_capacity(config.chain.order.len());
        for name in &config.chain.order {
            let stage: Arc<dyn Stage> = match name {
                StageName::Cors => Arc::new(stages::CorsStage::new(&config.cors)?),
                StageName::RateLimit => Arc::new(stages::RateLimitStage::new(
                    deps.limiter.clone(),
                    deps.tokens.clone(),
                    &config.rate_limit,
                )),
                StageName::RequestLog => Arc::new(stages::RequestLogStage),
                StageName::Authn => Arc::new(stages::AuthnStage::new(deps.tokens.clone())),
                StageName::Authz => Arc::new(stages::AuthzStage::new(deps.policies.clone())),
            };
            built.push(stage);
        }
        let routes = RouteTable::from_config(&config.chain.exclusions)?;
        tracing::info!(
            order = %config
                .chain
                .order
                .iter()
                .map(|stage| stage.as_str())
                .collect::<Vec<_>>()
                .join(","),
            exclusions = config.chain.exclusions.len(),
            "gatekeeper chain built"
        );
        Ok(Self::new(built, routes))
    }

    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Drive `request` through the stages and then `next`.
    ///
    /// # What it does
    /// Skips stages excluded for the route. The first rejection or direct
    /// response short-circuits the rest of the chain and the handler. `after`
    /// hooks still run for every entered stage.
    pub async fn run<F, Fut>(&self, mut request: Request, next: F) -> Response
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let mut ctx = RequestContext::from_request(&request);
        let skipped = self.routes.skipped(&ctx.method, &ctx.path);
        let mut entered: Vec<&Arc<dyn Stage>> = Vec::with_capacity(self.stages.len());
        let mut early = None;
        for stage in &self.stages {
            if skipped.contains(&stage.name()) {
                continue;
            }
            entered.push(stage);
            match stage.before(&mut ctx, &mut request).await {
                StageOutcome::Continue => {}
                StageOutcome::Reject(rejection) => {
                    tracing::debug!(stage = %stage.name(), ?rejection, "request rejected");
                    early = Some(rejection.into_response());
                    break;
                }
                StageOutcome::Respond(response) => {
                    early = Some(response);
                    break;
                }
            }
        }
        let mut response = match early {
            Some(response) => response,
            None => next(request).await,
        };
        for stage in entered.iter().rev() {
            stage.after(&ctx, &mut response);
        }
        response
    }
}

/// axum middleware entry point.
pub async fn gate(State(chain): State<Arc<Chain>>, request: Request, next: Next) -> Response {
    chain.run(request, |request| next.run(request)).await
}
