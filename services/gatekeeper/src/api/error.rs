//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Centralizes construction of envelope responses so every endpoint and every
//! gatekeeper stage fails with the same shape.
//!
//! # Key invariants and assumptions
//! - Authentication, authorization, validation and internal failures travel
//!   as HTTP 200 with a non-zero envelope `code`.
//! - Rate limiting is the exception: it uses a real 429 with `Retry-After`.
//!
//! # Security considerations
//! - Internal errors log details server-side but return a generic message.
use crate::api::types::{Envelope, codes};
use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::time::Duration;
use warden_authz::{PolicyError, TokenError};

/// Structured API error returned by handlers and stages.
///
/// # Invariants
/// - `body.code` is never `0`.
///
/// # Example
/// ```rust
/// use axum::http::StatusCode;
/// use gatekeeper::api::error::api_not_found;
/// use gatekeeper::api::types::codes;
///
/// let err = api_not_found("role viewer not found");
/// assert_eq!(err.status, StatusCode::OK);
/// assert_eq!(err.body.code, codes::NOT_FOUND);
/// assert_eq!(err.body.msg, "role viewer not found");
/// ```
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Envelope,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Handler result: a success envelope or an `ApiError`.
pub type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

/// Wrap `data` in a success envelope.
///
/// # What it does
/// Returns HTTP 200 with `code = 0` and `msg = "ok"`.
///
/// # Errors
/// - Does not fail.
pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(Envelope::ok(data)))
}

fn in_band(code: i32, msg: impl Into<String>) -> ApiError {
    ApiError {
        status: StatusCode::OK,
        body: Envelope::failure(code, msg),
    }
}

/// Build an in-band validation failure.
///
/// # What it does
/// Returns HTTP 200 carrying envelope code `400` and the provided message.
///
/// # Errors
/// - Does not fail.
pub fn api_bad_request(message: &str) -> ApiError {
    in_band(codes::BAD_REQUEST, message)
}

/// Build an in-band authentication failure.
///
/// # What it does
/// Returns HTTP 200 carrying envelope code `401`. The message must not say
/// whether an account exists.
///
/// # Errors
/// - Does not fail.
pub fn api_unauthorized(message: &str) -> ApiError {
    in_band(codes::UNAUTHORIZED, message)
}

/// Build the in-band authorization denial.
///
/// # What it does
/// Returns HTTP 200 carrying envelope code `403` and the fixed message
/// `forbidden`.
///
/// # Errors
/// - Does not fail.
pub fn api_forbidden() -> ApiError {
    in_band(codes::FORBIDDEN, "forbidden")
}

/// Build an in-band not-found failure.
///
/// # What it does
/// Returns HTTP 200 carrying envelope code `404` and the provided message.
///
/// # Errors
/// - Does not fail.
pub fn api_not_found(message: &str) -> ApiError {
    in_band(codes::NOT_FOUND, message)
}

/// Log `err` and return the generic internal error.
pub fn api_internal(context: &str, err: &dyn std::fmt::Display) -> ApiError {
    tracing::error!(error = %err, context, "internal error");
    internal_error()
}

/// Generic internal failure. Carries no detail about the cause.
pub fn internal_error() -> ApiError {
    in_band(codes::INTERNAL, "internal error")
}

/// 429 with a whole-second `Retry-After`, rounded up.
///
/// # Example
/// ```rust
/// use axum::http::{StatusCode, header};
/// use gatekeeper::api::error::rate_limited_response;
/// use std::time::Duration;
///
/// let response = rate_limited_response(Duration::from_millis(1_200));
/// assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
/// assert_eq!(response.headers()[header::RETRY_AFTER], "2");
/// ```
pub fn rate_limited_response(retry_after: Duration) -> Response {
    let mut secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 || secs == 0 {
        secs += 1;
    }
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(Envelope::failure(codes::TOO_MANY_REQUESTS, "too many requests")),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    response
}

/// Client-facing message for a token failure.
///
/// # What it does
/// Maps each `TokenError` to a short fixed string. Signing and configuration
/// faults collapse to `invalid token` so key material never leaks.
pub fn token_failure_message(err: &TokenError) -> &'static str {
    match err {
        TokenError::Expired => "token expired",
        TokenError::Invalid(_) => "invalid token",
        TokenError::Revoked => "token revoked",
        TokenError::StoreUnavailable(_) => "session store unavailable",
        TokenError::Signing(_) | TokenError::Config(_) => "invalid token",
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(_) | TokenError::Config(_) => api_internal("token service", &err),
            other => api_unauthorized(token_failure_message(&other)),
        }
    }
}

impl From<PolicyError> for ApiError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::RoleNotFound(_) => api_not_found(&err.to_string()),
            PolicyError::InheritanceCycle { .. } | PolicyError::InvalidRule(_) => {
                api_bad_request(&err.to_string())
            }
            PolicyError::Store(_) => api_internal("policy store", &err),
        }
    }
}
