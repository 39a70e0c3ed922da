use thiserror::Error;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("rate limit store returned malformed reply: {0}")]
    MalformedReply(String),
}

impl From<redis::RedisError> for RateLimitError {
    fn from(value: redis::RedisError) -> Self {
        Self::StoreUnavailable(value.to_string())
    }
}
