use serde::{Deserialize, Serialize};
use warden_authz::PolicyRule;
use warden_common::Identity;

/// Envelope codes carried in the response body.
pub mod codes {
    pub const SUCCESS: i32 = 0;
    pub const BAD_REQUEST: i32 = 400;
    pub const UNAUTHORIZED: i32 = 401;
    pub const FORBIDDEN: i32 = 403;
    pub const NOT_FOUND: i32 = 404;
    pub const TOO_MANY_REQUESTS: i32 = 429;
    pub const INTERNAL: i32 = 500;
}

/// Uniform response body. `code == 0` means success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T = serde_json::Value> {
    pub code: i32,
    pub data: T,
    pub msg: String,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: codes::SUCCESS,
            data,
            msg: "ok".to_string(),
        }
    }
}

impl Envelope<serde_json::Value> {
    pub fn failure(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            data: serde_json::Value::Null,
            msg: msg.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
    pub user: Identity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub token_type: String,
    pub access_token: String,
    pub access_expires_at: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub revocation_backend: String,
    pub rate_limit_backend: String,
}

/// A grant without its role, used when the role is already in the path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub resource: String,
    pub action: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplacePoliciesRequest {
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePoliciesResponse {
    pub role: String,
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddParentRequest {
    pub parent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoleRequest {
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSummary {
    pub role: String,
    pub parents: Vec<String>,
    pub rules: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeResponse {
    pub changed: bool,
}
