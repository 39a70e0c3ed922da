//! Session endpoints.
//!
//! # Purpose and responsibility
//! Exchanges credentials for a token pair, mints access tokens from refresh
//! tokens, revokes tokens at logout and echoes the caller's identity.
//!
//! # Key invariants and assumptions
//! - Login and refresh run without authentication; logout and `me` need a
//!   valid access token but no policy grant.
//! - Logout revokes the presented access token and, when supplied, the
//!   caller's own refresh token. A foreign refresh token is refused before
//!   anything is revoked.
//!
//! # Security considerations
//! - Login failures never reveal whether the username exists.
use crate::api::error::{
    ApiError, ApiResult, api_bad_request, api_internal, api_unauthorized, ok,
};
use crate::api::json_body;
use crate::api::types::{
    ChangeResponse, LoginRequest, LoginResponse, LogoutRequest, RefreshRequest, RefreshResponse,
};
use crate::app::AppState;
use axum::Extension;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, header};
use warden_authz::{TokenError, TokenKind};
use warden_common::{Identity, bearer_token};

const TOKEN_TYPE: &str = "Bearer";

/// `POST /api/v1/auth/login`
///
/// # What it does
/// Verifies the credentials and returns an access/refresh pair together
/// with the caller's identity.
///
/// # Errors
/// - Envelope `400` for a malformed body or blank credentials.
/// - Envelope `401` for an unknown user or wrong password. Both read the same.
/// - Envelope `500` if signing fails.
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<LoginResponse> {
    let body = json_body(payload)?;
    if body.username.trim().is_empty() || body.password.is_empty() {
        return Err(api_bad_request("username and password are required"));
    }
    let Some(account) = state.accounts.verify(&body.username, &body.password).await else {
        tracing::info!(username = %body.username, "login rejected");
        return Err(api_unauthorized("invalid credentials"));
    };
    let identity = account
        .identity()
        .map_err(|err| api_internal("account has no usable identity", &err))?;
    let pair = state.tokens.issue(&identity)?;
    tracing::info!(subject = %identity.subject_id, role = %identity.role, "login succeeded");
    ok(LoginResponse {
        token_type: TOKEN_TYPE.to_string(),
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        access_expires_at: pair.access_expires_at,
        refresh_expires_at: pair.refresh_expires_at,
        user: identity,
    })
}

/// `POST /api/v1/auth/refresh`
///
/// # What it does
/// Mints a fresh access token from a valid refresh token. The refresh token
/// itself is not rotated.
///
/// # Errors
/// - Envelope `400` for a malformed body.
/// - Envelope `401` when the token is expired, revoked, of the wrong kind or
///   the revocation store cannot vouch for it.
pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> ApiResult<RefreshResponse> {
    let body = json_body(payload)?;
    let signed = state.tokens.refresh(&body.refresh_token).await?;
    ok(RefreshResponse {
        token_type: TOKEN_TYPE.to_string(),
        access_token: signed.token,
        access_expires_at: signed.expires_at,
    })
}

fn caller(identity: Option<Extension<Identity>>) -> Result<Identity, ApiError> {
    identity
        .map(|Extension(identity)| identity)
        .ok_or_else(|| api_unauthorized("missing bearer token"))
}

/// `POST /api/v1/auth/logout`
///
/// # What it does
/// Revokes the presented access token and, if the body names one, the
/// caller's refresh token.
///
/// # Errors
/// - Envelope `401` without a bearer token.
/// - Envelope `400` if the refresh token belongs to someone else. Nothing is
///   revoked in that case.
/// - Envelope `401` when the revocation store is unavailable.
pub async fn logout(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    headers: HeaderMap,
    payload: Option<Json<LogoutRequest>>,
) -> ApiResult<ChangeResponse> {
    let identity = caller(identity)?;
    let access = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(|| api_unauthorized("missing bearer token"))?;
    let body = payload.map(|Json(body)| body).unwrap_or_default();

    let refresh = match body.refresh_token.as_deref() {
        Some(token) => match state.tokens.validate_kind(token, TokenKind::Refresh).await {
            Ok(claims) if claims.sub != identity.subject_id => {
                return Err(api_bad_request("refresh token belongs to another subject"));
            }
            Ok(_) => Some(token),
            // Already unusable; nothing left to revoke.
            Err(TokenError::Expired | TokenError::Revoked) => None,
            Err(err) => return Err(err.into()),
        },
        None => None,
    };

    state.tokens.revoke(access).await?;
    if let Some(token) = refresh {
        state.tokens.revoke(token).await?;
    }
    tracing::info!(
        subject = %identity.subject_id,
        refresh_revoked = refresh.is_some(),
        "logout"
    );
    ok(ChangeResponse { changed: true })
}

/// `GET /api/v1/auth/me` echoes the identity published by authentication.
pub async fn me(identity: Option<Extension<Identity>>) -> ApiResult<Identity> {
    ok(caller(identity)?)
}
