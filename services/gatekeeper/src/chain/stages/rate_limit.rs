use crate::chain::{GateRejection, RequestContext, Stage, StageName, StageOutcome};
use crate::config::RateLimitSettings;
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::header;
use std::sync::Arc;
use std::time::Duration;
use warden_authz::TokenService;
use warden_common::bearer_token;
use warden_ratelimit::{Decision, KeyStrategy, RateLimiter};

/// Sliding-window admission keyed by client address or subject.
///
/// A store failure admits the request; only a full window rejects it.
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
    tokens: Arc<TokenService>,
    limit: u32,
    window: Duration,
    strategy: KeyStrategy,
}

impl RateLimitStage {
    pub fn new(
        limiter: Arc<RateLimiter>,
        tokens: Arc<TokenService>,
        settings: &RateLimitSettings,
    ) -> Self {
        Self {
            limiter,
            tokens,
            limit: settings.limit,
            window: settings.window(),
            strategy: settings.key,
        }
    }

    // Runs ahead of authentication, so the subject comes from an unverified
    // peek; revocation is left to the authentication stage.
    fn subject(&self, request: &Request) -> Option<String> {
        let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
        self.tokens.peek_subject(bearer_token(value)?)
    }

    /// Bucket key for this request. Under the identity strategy a verified
    /// identity already on the context wins over the peeked bearer subject;
    /// the client address is the last resort.
    pub fn key_for(&self, ctx: &RequestContext, request: &Request) -> String {
        let address = ctx.client_addr.map(|addr| addr.ip().to_string());
        let subject = match self.strategy {
            KeyStrategy::Identity => ctx
                .identity
                .as_ref()
                .map(|identity| identity.subject_id.clone())
                .or_else(|| self.subject(request)),
            KeyStrategy::Address => None,
        };
        self.strategy.resolve(address.as_deref(), subject.as_deref())
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> StageName {
        StageName::RateLimit
    }

    async fn before(&self, ctx: &mut RequestContext, request: &mut Request) -> StageOutcome {
        let key = self.key_for(ctx, request);
        match self.limiter.check(&key, self.limit, self.window).await {
            Decision::Allowed => StageOutcome::Continue,
            Decision::Limited { retry_after } => {
                tracing::info!(key = %key, path = %ctx.path, "rate limit exceeded");
                StageOutcome::Reject(GateRejection::RateLimited { retry_after })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use std::net::SocketAddr;
    use warden_authz::{
        DEFAULT_REVOCATION_TIMEOUT, MemoryRevocationStore, RevocationFailurePolicy, TokenConfig,
    };
    use warden_common::{Clock, Identity, ManualClock};
    use warden_ratelimit::MemoryWindowStore;

    fn stage(strategy: KeyStrategy, limit: u32) -> (RateLimitStage, Arc<TokenService>) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_700_000_000_000));
        let tokens = Arc::new(
            TokenService::new(
                TokenConfig {
                    issuer: "warden-test".to_string(),
                    secret: vec![7u8; 32],
                    access_ttl: Duration::from_secs(900),
                    refresh_ttl: Duration::from_secs(3_600),
                    revocation_failure: RevocationFailurePolicy::Closed,
                    revocation_timeout: DEFAULT_REVOCATION_TIMEOUT,
                },
                clock.clone(),
                Arc::new(MemoryRevocationStore::new(clock.clone())),
            )
            .expect("token service"),
        );
        let limiter = Arc::new(RateLimiter::new(Arc::new(MemoryWindowStore::new()), clock));
        let settings = RateLimitSettings {
            limit,
            window_secs: 60,
            key: strategy,
            sweep_interval_secs: 30,
            store_timeout_ms: 250,
        };
        (RateLimitStage::new(limiter, tokens.clone(), &settings), tokens)
    }

    fn request_from(addr: &str, bearer: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/api/v1/roles");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let mut request = builder.body(Body::empty()).expect("request");
        let addr: SocketAddr = addr.parse().expect("addr");
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[test]
    fn address_strategy_keys_by_ip() {
        let (stage, _) = stage(KeyStrategy::Address, 10);
        let request = request_from("10.1.2.3:4455", None);
        let ctx = RequestContext::from_request(&request);
        assert_eq!(stage.key_for(&ctx, &request), "addr:10.1.2.3");
    }

    #[test]
    fn identity_strategy_uses_token_subject() {
        let (stage, tokens) = stage(KeyStrategy::Identity, 10);
        let identity = Identity::new("42", "Ann", "editor").expect("identity");
        let pair = tokens.issue(&identity).expect("issue");
        let request = request_from("10.1.2.3:4455", Some(&pair.access_token));
        let ctx = RequestContext::from_request(&request);
        assert_eq!(stage.key_for(&ctx, &request), "sub:42");

        let anonymous = request_from("10.1.2.3:4455", Some("garbage"));
        let ctx = RequestContext::from_request(&anonymous);
        assert_eq!(stage.key_for(&ctx, &anonymous), "addr:10.1.2.3");
    }

    #[test]
    fn identity_strategy_prefers_verified_identity() {
        let (stage, tokens) = stage(KeyStrategy::Identity, 10);
        let request = request_from("10.1.2.3:4455", None);
        let mut ctx = RequestContext::from_request(&request);
        ctx.identity = Some(Identity::new("7", "Bo", "viewer").expect("identity"));
        assert_eq!(stage.key_for(&ctx, &request), "sub:7");

        // A bearer for someone else does not override the verified identity.
        let other = Identity::new("42", "Ann", "editor").expect("identity");
        let pair = tokens.issue(&other).expect("issue");
        let request = request_from("10.1.2.3:4455", Some(&pair.access_token));
        assert_eq!(stage.key_for(&ctx, &request), "sub:7");
    }

    #[test]
    fn address_strategy_ignores_identity() {
        let (stage, _) = stage(KeyStrategy::Address, 10);
        let request = request_from("10.1.2.3:4455", None);
        let mut ctx = RequestContext::from_request(&request);
        ctx.identity = Some(Identity::new("7", "Bo", "viewer").expect("identity"));
        assert_eq!(stage.key_for(&ctx, &request), "addr:10.1.2.3");
    }

    #[tokio::test]
    async fn rejects_once_the_window_is_full() {
        let (stage, _) = stage(KeyStrategy::Address, 2);
        for _ in 0..2 {
            let mut request = request_from("10.9.9.9:1000", None);
            let mut ctx = RequestContext::from_request(&request);
            assert!(matches!(
                stage.before(&mut ctx, &mut request).await,
                StageOutcome::Continue
            ));
        }
        let mut request = request_from("10.9.9.9:1001", None);
        let mut ctx = RequestContext::from_request(&request);
        match stage.before(&mut ctx, &mut request).await {
            StageOutcome::Reject(GateRejection::RateLimited { retry_after }) => {
                assert!(retry_after <= Duration::from_secs(60));
                assert!(retry_after > Duration::ZERO);
            }
            _ => panic!("third request must be limited"),
        }

        let mut other = request_from("10.9.9.10:1000", None);
        let mut ctx = RequestContext::from_request(&other);
        assert!(matches!(
            stage.before(&mut ctx, &mut other).await,
            StageOutcome::Continue
        ));
    }
}
