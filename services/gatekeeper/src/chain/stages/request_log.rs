use crate::chain::{RequestContext, Stage, StageName, StageOutcome};
use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;

/// One structured event per request, emitted on the way out.
pub struct RequestLogStage;

#[async_trait]
impl Stage for RequestLogStage {
    fn name(&self) -> StageName {
        StageName::RequestLog
    }

    async fn before(&self, _ctx: &mut RequestContext, _request: &mut Request) -> StageOutcome {
        StageOutcome::Continue
    }

    fn after(&self, ctx: &RequestContext, response: &mut Response) {
        let latency_ms = ctx.started.elapsed().as_secs_f64() * 1_000.0;
        let subject = ctx
            .identity
            .as_ref()
            .map(|identity| identity.subject_id.as_str())
            .unwrap_or("-");
        tracing::info!(
            method = %ctx.method,
            path = %ctx.path,
            status = response.status().as_u16(),
            latency_ms,
            subject,
            "request completed"
        );
    }
}
