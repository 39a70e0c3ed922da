//! Health endpoint.
//!
//! Read-only and unauthenticated; reports which backends the session and
//! rate-limit state live in.
use crate::api::error::{ApiResult, ok};
use crate::api::types::HealthResponse;
use crate::app::AppState;
use axum::extract::State;

/// `GET /health`
///
/// # What it does
/// Reports liveness and the backend names of the revocation and rate-limit
/// stores. Never touches either store.
pub async fn health(State(state): State<AppState>) -> ApiResult<HealthResponse> {
    ok(HealthResponse {
        status: "ok".to_string(),
        revocation_backend: state.tokens.revocation_backend().to_string(),
        rate_limit_backend: state.limiter.backend_name().to_string(),
    })
}
