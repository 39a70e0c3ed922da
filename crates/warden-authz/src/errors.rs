use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token revoked")]
    Revoked,
    #[error("revocation store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("token signing failed: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error("token config: {0}")]
    Config(String),
}

pub type TokenResult<T> = Result<T, TokenError>;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("role not found: {0}")]
    RoleNotFound(String),
    #[error("role inheritance {child} -> {parent} would create a cycle")]
    InheritanceCycle { child: String, parent: String },
    #[error("invalid rule: {0}")]
    InvalidRule(String),
    #[error("policy store: {0}")]
    Store(String),
}

pub type PolicyResult<T> = Result<T, PolicyError>;

#[derive(Debug, Error)]
#[error("revocation store unavailable: {0}")]
pub struct RevocationStoreError(pub String);

impl From<redis::RedisError> for RevocationStoreError {
    fn from(value: redis::RedisError) -> Self {
        Self(value.to_string())
    }
}
