use crate::chain::{GateRejection, RequestContext, Stage, StageName, StageOutcome};
use async_trait::async_trait;
use axum::extract::Request;
use std::sync::Arc;
use warden_authz::{PolicyEngine, PolicyError};

pub const AUTHZ_DECISIONS_METRIC: &str = "warden_authz_decisions_total";

/// Default-deny check of (role, path, method) against the policy engine.
pub struct AuthzStage {
    policies: Arc<PolicyEngine>,
}

impl AuthzStage {
    pub fn new(policies: Arc<PolicyEngine>) -> Self {
        Self { policies }
    }
}

#[async_trait]
impl Stage for AuthzStage {
    fn name(&self) -> StageName {
        StageName::Authz
    }

    async fn before(&self, ctx: &mut RequestContext, _request: &mut Request) -> StageOutcome {
        let Some(identity) = ctx.identity.as_ref() else {
            return StageOutcome::Reject(GateRejection::Unauthenticated("missing bearer token"));
        };
        let outcome = match self
            .policies
            .enforce(&identity.role, &ctx.path, ctx.method.as_str())
        {
            Ok(true) => "allow",
            Ok(false) => "deny",
            Err(PolicyError::RoleNotFound(role)) => {
                tracing::warn!(
                    role = %role,
                    subject = %identity.subject_id,
                    "token carries unknown role"
                );
                "unknown_role"
            }
            Err(err) => {
                tracing::error!(error = %err, "policy evaluation failed");
                "error"
            }
        };
        metrics::counter!(AUTHZ_DECISIONS_METRIC, "outcome" => outcome).increment(1);
        if outcome == "allow" {
            StageOutcome::Continue
        } else {
            tracing::debug!(
                subject = %identity.subject_id,
                role = %identity.role,
                method = %ctx.method,
                path = %ctx.path,
                outcome,
                "request denied"
            );
            StageOutcome::Reject(GateRejection::Forbidden)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Method;
    use warden_authz::{InheritanceEdge, MemoryPolicyStore, PolicyRule, PolicySet};
    use warden_common::Identity;

    async fn engine() -> Arc<PolicyEngine> {
        let set = PolicySet {
            roles: ["admin", "editor", "viewer"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            rules: vec![
                PolicyRule::new("viewer", "/api/v1/doc/:id", "GET"),
                PolicyRule::new("editor", "/api/v1/doc/:id", "PUT"),
            ],
            inheritance: vec![InheritanceEdge::new("editor", "viewer")],
        };
        let store = Arc::new(MemoryPolicyStore::with_policies(set));
        Arc::new(PolicyEngine::load(store).await.expect("engine"))
    }

    async fn decide(
        stage: &AuthzStage,
        role: Option<&str>,
        method: Method,
        path: &str,
    ) -> StageOutcome {
        let mut request = axum::http::Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .expect("request");
        let mut ctx = RequestContext::from_request(&request);
        ctx.identity = role.map(|role| Identity::new("1", "Test", role).expect("identity"));
        stage.before(&mut ctx, &mut request).await
    }

    #[tokio::test]
    async fn inherited_rule_allows() {
        let stage = AuthzStage::new(engine().await);
        assert!(matches!(
            decide(&stage, Some("editor"), Method::GET, "/api/v1/doc/7").await,
            StageOutcome::Continue
        ));
        assert!(matches!(
            decide(&stage, Some("editor"), Method::PUT, "/api/v1/doc/7").await,
            StageOutcome::Continue
        ));
    }

    #[tokio::test]
    async fn unmatched_requests_are_forbidden() {
        let stage = AuthzStage::new(engine().await);
        for (role, method, path) in [
            ("viewer", Method::PUT, "/api/v1/doc/7"),
            ("editor", Method::GET, "/api/v1/doc/7/history"),
            ("admin", Method::GET, "/api/v1/doc/7"),
            ("ghost", Method::GET, "/api/v1/doc/7"),
        ] {
            assert!(matches!(
                decide(&stage, Some(role), method, path).await,
                StageOutcome::Reject(GateRejection::Forbidden)
            ));
        }
    }

    #[tokio::test]
    async fn missing_identity_is_an_authentication_failure() {
        let stage = AuthzStage::new(engine().await);
        assert!(matches!(
            decide(&stage, None, Method::GET, "/api/v1/doc/7").await,
            StageOutcome::Reject(GateRejection::Unauthenticated(_))
        ));
    }
}
