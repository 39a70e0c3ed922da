use crate::window::{Decision, WindowStore, window_millis};
use crate::RateLimitError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug)]
struct Window {
    events: VecDeque<i64>,
    window_ms: i64,
    last_seen_ms: i64,
}

impl Window {
    fn new(window_ms: i64, now_ms: i64) -> Self {
        Self {
            events: VecDeque::new(),
            window_ms,
            last_seen_ms: now_ms,
        }
    }

    fn admit(&mut self, limit: u32, window_ms: i64, now_ms: i64) -> Decision {
        self.window_ms = window_ms;
        self.last_seen_ms = self.last_seen_ms.max(now_ms);
        let cutoff = now_ms.saturating_sub(window_ms);
        while self.events.front().is_some_and(|&at| at <= cutoff) {
            self.events.pop_front();
        }
        if self.events.len() < limit as usize {
            self.events.push_back(now_ms);
            return Decision::Allowed;
        }
        let oldest = self.events.front().copied().unwrap_or(now_ms);
        let wait_ms = oldest.saturating_add(window_ms).saturating_sub(now_ms).max(1);
        Decision::Limited {
            retry_after: Duration::from_millis(wait_ms as u64),
        }
    }

    fn is_idle(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.last_seen_ms) >= self.window_ms.saturating_mul(2)
    }
}

/// Process-local windows. The entry's shard lock is held across
/// prune, count and insert.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    windows: DashMap<String, Window>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    fn evict_idle(&self, now_ms: i64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_idle(now_ms));
        before.saturating_sub(self.windows.len())
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn admit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now_ms: i64,
    ) -> Result<Decision, RateLimitError> {
        let window_ms = window_millis(window);
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window::new(window_ms, now_ms));
        Ok(entry.admit(limit, window_ms, now_ms))
    }

    async fn prune_idle(&self, now_ms: i64) -> usize {
        self.evict_idle(now_ms)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
