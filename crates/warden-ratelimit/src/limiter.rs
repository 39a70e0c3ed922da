use crate::RateLimitError;
use crate::window::{Decision, WindowStore};
use std::sync::Arc;
use std::time::Duration;
use warden_common::Clock;

const DECISIONS_METRIC: &str = "warden_ratelimit_decisions_total";

/// Default bound on one admission call against the store.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// Per-key sliding-window admission over a shared `WindowStore`.
///
/// A store failure admits the request, and so does a store that has not
/// answered within the store timeout.
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Replace the admission time bound. A zero bound keeps the default.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.store_timeout = timeout;
        }
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub async fn allow(&self, key: &str, limit: u32, window: Duration) -> bool {
        self.check(key, limit, window).await.is_allowed()
    }

    /// Like `allow`, but reports how long a rejected caller should wait.
    /// A zero limit or window disables limiting for the call.
    pub async fn check(&self, key: &str, limit: u32, window: Duration) -> Decision {
        if limit == 0 || window.is_zero() {
            return Decision::Allowed;
        }
        let now_ms = self.clock.now_millis();
        match self.admit(key, limit, window, now_ms).await {
            Ok(decision) => {
                let outcome = if decision.is_allowed() {
                    "allowed"
                } else {
                    "limited"
                };
                metrics::counter!(DECISIONS_METRIC, "outcome" => outcome).increment(1);
                decision
            }
            Err(err) => {
                metrics::counter!(DECISIONS_METRIC, "outcome" => "failed_open").increment(1);
                tracing::warn!(
                    backend = self.store.backend_name(),
                    key,
                    error = %err,
                    "rate limit store unavailable; admitting request"
                );
                Decision::Allowed
            }
        }
    }

    async fn admit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now_ms: i64,
    ) -> Result<Decision, RateLimitError> {
        tokio::time::timeout(self.store_timeout, self.store.admit(key, limit, window, now_ms))
            .await
            .unwrap_or_else(|_| {
                Err(RateLimitError::StoreUnavailable(format!(
                    "no reply within {}ms",
                    self.store_timeout.as_millis()
                )))
            })
    }

    pub async fn prune_idle(&self) -> usize {
        self.store.prune_idle(self.clock.now_millis()).await
    }
}
