use crate::chain::{RequestContext, Stage, StageName, StageOutcome};
use crate::config::CorsConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};

/// Answers preflight requests and decorates every response with the
/// cross-origin headers for allowed origins.
pub struct CorsStage {
    any_origin: bool,
    origins: Vec<String>,
    allow_credentials: bool,
    allow_methods: Option<HeaderValue>,
    allow_headers: Option<HeaderValue>,
    expose_headers: Option<HeaderValue>,
    max_age: HeaderValue,
}

fn joined(values: &[String], what: &str) -> Result<Option<HeaderValue>> {
    if values.is_empty() {
        return Ok(None);
    }
    HeaderValue::from_str(&values.join(", "))
        .map(Some)
        .with_context(|| format!("invalid cors {what}"))
}

impl CorsStage {
    pub fn new(config: &CorsConfig) -> Result<Self> {
        Ok(Self {
            any_origin: config.allowed_origins.iter().any(|origin| origin == "*"),
            origins: config.allowed_origins.clone(),
            allow_credentials: config.allow_credentials,
            allow_methods: joined(&config.allowed_methods, "methods")?,
            allow_headers: joined(&config.allowed_headers, "headers")?,
            expose_headers: joined(&config.expose_headers, "expose headers")?,
            max_age: HeaderValue::from(config.max_age_secs),
        })
    }

    fn allows(&self, origin: &str) -> bool {
        self.any_origin || self.origins.iter().any(|allowed| allowed == origin)
    }

    fn preflight(&self, origin: &str) -> Response {
        let mut response = StatusCode::NO_CONTENT.into_response();
        if !self.allows(origin) {
            return response;
        }
        let headers = response.headers_mut();
        if let Some(methods) = &self.allow_methods {
            headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, methods.clone());
        }
        if let Some(allowed) = &self.allow_headers {
            headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allowed.clone());
        }
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        response
    }
}

fn is_preflight(request: &Request) -> bool {
    request.method() == Method::OPTIONS
        && request.headers().contains_key(header::ORIGIN)
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

#[async_trait]
impl Stage for CorsStage {
    fn name(&self) -> StageName {
        StageName::Cors
    }

    async fn before(&self, ctx: &mut RequestContext, request: &mut Request) -> StageOutcome {
        match ctx.origin.as_deref() {
            Some(origin) if is_preflight(request) => StageOutcome::Respond(self.preflight(origin)),
            _ => StageOutcome::Continue,
        }
    }

    fn after(&self, ctx: &RequestContext, response: &mut Response) {
        let Some(origin) = ctx.origin.as_deref() else {
            return;
        };
        let headers = response.headers_mut();
        headers.append(header::VARY, HeaderValue::from_static("origin"));
        if !self.allows(origin) {
            return;
        }
        // A literal "*" is not accepted by browsers alongside credentials.
        let allow_origin = if self.any_origin && !self.allow_credentials {
            Some(HeaderValue::from_static("*"))
        } else {
            HeaderValue::from_str(origin).ok()
        };
        if let Some(value) = allow_origin {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        if self.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        if let Some(expose) = &self.expose_headers {
            headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, expose.clone());
        }
    }
}
