use crate::window::{Decision, WindowStore, window_millis};
use crate::RateLimitError;
use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// KEYS[1] window key
// ARGV window_ms, limit, member
// Returns {allowed, retry_after_ms}. Time comes from the Redis server so every
// instance scores events on the same clock.
const ADMIT_SCRIPT: &str = r#"
if redis.replicate_commands then
  redis.replicate_commands()
end
local key = KEYS[1]
local time = redis.call('TIME')
local now = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)
local window = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
if count < limit then
  redis.call('ZADD', key, now, ARGV[3])
  redis.call('PEXPIRE', key, window * 2)
  return {1, 0}
end
local retry = window
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if oldest[2] then
  retry = tonumber(oldest[2]) + window - now
end
redis.call('PEXPIRE', key, window * 2)
return {0, retry}
"#;

/// Sliding windows kept in Redis sorted sets so every gatekeeper instance
/// shares the same counts. The whole admission runs server-side in one script,
/// timed by the server; the caller's `now_ms` is ignored.
#[derive(Clone)]
pub struct RedisWindowStore {
    manager: ConnectionManager,
    prefix: Arc<String>,
    script: Arc<Script>,
}

impl RedisWindowStore {
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(url)
            .map_err(|err| RateLimitError::StoreUnavailable(format!("redis client: {err}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| RateLimitError::StoreUnavailable(format!("redis connect: {err}")))?;
        Ok(Self::from_manager(manager, prefix))
    }

    pub fn from_manager(manager: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            manager,
            prefix: Arc::new(prefix.into()),
            script: Arc::new(Script::new(ADMIT_SCRIPT)),
        }
    }

    fn namespaced_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn admit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        _now_ms: i64,
    ) -> Result<Decision, RateLimitError> {
        let window_ms = window_millis(window);
        let member = Uuid::new_v4().simple().to_string();
        let mut conn = self.manager.clone();
        let reply: Vec<i64> = self
            .script
            .key(self.namespaced_key(key))
            .arg(window_ms)
            .arg(limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;
        match reply.as_slice() {
            [1, _] => Ok(Decision::Allowed),
            [0, retry_ms] => Ok(Decision::Limited {
                retry_after: Duration::from_millis((*retry_ms).max(1) as u64),
            }),
            other => Err(RateLimitError::MalformedReply(format!("{other:?}"))),
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
