use crate::api::error::token_failure_message;
use crate::chain::{GateRejection, RequestContext, Stage, StageName, StageOutcome};
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::header;
use std::sync::Arc;
use warden_authz::{TokenError, TokenService};
use warden_common::bearer_token;

pub const AUTHN_FAILURES_METRIC: &str = "warden_authn_failures_total";

/// Validates the bearer access token and publishes the caller's identity.
pub struct AuthnStage {
    tokens: Arc<TokenService>,
}

impl AuthnStage {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens }
    }
}

fn failure_reason(err: &TokenError) -> &'static str {
    match err {
        TokenError::Expired => "expired",
        TokenError::Invalid(_) => "invalid",
        TokenError::Revoked => "revoked",
        TokenError::StoreUnavailable(_) => "store_unavailable",
        TokenError::Signing(_) | TokenError::Config(_) => "internal",
    }
}

#[async_trait]
impl Stage for AuthnStage {
    fn name(&self) -> StageName {
        StageName::Authn
    }

    async fn before(&self, ctx: &mut RequestContext, request: &mut Request) -> StageOutcome {
        let token = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_owned);
        let Some(token) = token else {
            metrics::counter!(AUTHN_FAILURES_METRIC, "reason" => "missing").increment(1);
            return StageOutcome::Reject(GateRejection::Unauthenticated("missing bearer token"));
        };
        match self.tokens.authenticate(&token).await {
            Ok(identity) => {
                request.extensions_mut().insert(identity.clone());
                ctx.identity = Some(identity);
                StageOutcome::Continue
            }
            Err(err) => {
                let reason = failure_reason(&err);
                metrics::counter!(AUTHN_FAILURES_METRIC, "reason" => reason).increment(1);
                match &err {
                    TokenError::StoreUnavailable(_)
                    | TokenError::Signing(_)
                    | TokenError::Config(_) => {
                        tracing::error!(error = %err, path = %ctx.path, "authentication failed");
                    }
                    _ => tracing::debug!(error = %err, path = %ctx.path, "authentication failed"),
                }
                StageOutcome::Reject(GateRejection::Unauthenticated(token_failure_message(&err)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use std::time::Duration;
    use warden_authz::{
        DEFAULT_REVOCATION_TIMEOUT, MemoryRevocationStore, RevocationFailurePolicy, TokenConfig,
    };
    use warden_common::{Clock, Identity, ManualClock};

    fn service(clock: Arc<ManualClock>) -> Arc<TokenService> {
        let clock: Arc<dyn Clock> = clock;
        Arc::new(
            TokenService::new(
                TokenConfig {
                    issuer: "warden-test".to_string(),
                    secret: vec![3u8; 32],
                    access_ttl: Duration::from_secs(60),
                    refresh_ttl: Duration::from_secs(600),
                    revocation_failure: RevocationFailurePolicy::Closed,
                    revocation_timeout: DEFAULT_REVOCATION_TIMEOUT,
                },
                clock.clone(),
                Arc::new(MemoryRevocationStore::new(clock)),
            )
            .expect("token service"),
        )
    }

    fn request(authorization: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/api/v1/roles");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).expect("request")
    }

    async fn run_stage(
        stage: &AuthnStage,
        mut request: Request,
    ) -> (StageOutcome, RequestContext, Request) {
        let mut ctx = RequestContext::from_request(&request);
        let outcome = stage.before(&mut ctx, &mut request).await;
        (outcome, ctx, request)
    }

    #[tokio::test]
    async fn valid_token_publishes_identity() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let tokens = service(clock);
        let identity = Identity::new("42", "Ann", "editor").expect("identity");
        let pair = tokens.issue(&identity).expect("issue");
        let stage = AuthnStage::new(tokens);
        let header = format!("Bearer {}", pair.access_token);
        let (outcome, ctx, request) = run_stage(&stage, request(Some(&header))).await;
        assert!(matches!(outcome, StageOutcome::Continue));
        assert_eq!(ctx.identity.as_ref(), Some(&identity));
        assert_eq!(request.extensions().get::<Identity>(), Some(&identity));
    }

    #[tokio::test]
    async fn missing_or_malformed_header_is_rejected() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let stage = AuthnStage::new(service(clock));
        for header in [None, Some("Basic abc"), Some("Bearer")] {
            let (outcome, ctx, _) = run_stage(&stage, request(header)).await;
            assert!(matches!(
                outcome,
                StageOutcome::Reject(GateRejection::Unauthenticated("missing bearer token"))
            ));
            assert!(ctx.identity.is_none());
        }
    }

    #[tokio::test]
    async fn failures_carry_the_token_reason() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let tokens = service(clock.clone());
        let identity = Identity::new("42", "Ann", "editor").expect("identity");
        let pair = tokens.issue(&identity).expect("issue");
        let stage = AuthnStage::new(tokens.clone());

        let refresh = format!("Bearer {}", pair.refresh_token);
        let (outcome, _, _) = run_stage(&stage, request(Some(&refresh))).await;
        assert!(matches!(
            outcome,
            StageOutcome::Reject(GateRejection::Unauthenticated("invalid token"))
        ));

        tokens.revoke(&pair.access_token).await.expect("revoke");
        let access = format!("Bearer {}", pair.access_token);
        let (outcome, _, _) = run_stage(&stage, request(Some(&access))).await;
        assert!(matches!(
            outcome,
            StageOutcome::Reject(GateRejection::Unauthenticated("token revoked"))
        ));

        let fresh = tokens.issue(&identity).expect("issue");
        clock.advance(Duration::from_secs(61));
        let expired = format!("Bearer {}", fresh.access_token);
        let (outcome, _, _) = run_stage(&stage, request(Some(&expired))).await;
        assert!(matches!(
            outcome,
            StageOutcome::Reject(GateRejection::Unauthenticated("token expired"))
        ));
    }
}
