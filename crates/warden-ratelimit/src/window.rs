use crate::RateLimitError;
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Rejected. `retry_after` is when the oldest event leaves the window.
    Limited { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Shared per-key sliding window.
///
/// `admit` must prune events at or before `now - window`, count the rest and
/// record `now` only if the count is below `limit`, all as one atomic step for
/// the key. `now_ms` is the caller's clock; a store shared by several
/// instances may substitute its own.
#[async_trait]
pub trait WindowStore: Send + Sync {
    async fn admit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now_ms: i64,
    ) -> Result<Decision, RateLimitError>;

    /// Evict keys idle for at least twice their window. Backends that expire
    /// keys themselves keep the default.
    async fn prune_idle(&self, _now_ms: i64) -> usize {
        0
    }

    fn backend_name(&self) -> &'static str;
}

pub(crate) fn window_millis(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX)
}
