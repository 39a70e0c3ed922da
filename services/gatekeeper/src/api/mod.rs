//! Gatekeeper HTTP API.
//!
//! # Purpose
//! Session endpoints (login, refresh, logout, me), health, and the policy
//! administration routes. Every handler answers with the `Envelope` shape.
pub mod auth;
pub mod error;
pub mod policies;
pub mod system;
pub mod types;

use crate::api::error::{ApiError, api_bad_request};
use axum::Json;
use axum::extract::rejection::JsonRejection;

/// Unwrap a JSON body, turning extractor rejections into an in-band 400.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| api_bad_request(&rejection.body_text()))
}
