//! Sliding-window request rate limiting.
//!
//! Each key keeps the timestamps of its admitted events inside the trailing
//! window. An event is admitted only while fewer than `limit` remain after
//! pruning, and rejected attempts are never recorded. Windows live either in
//! process memory or in Redis sorted sets shared by every instance.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use warden_common::ManualClock;
//! use warden_ratelimit::{MemoryWindowStore, RateLimiter};
//!
//! # tokio_test_block(async {
//! let limiter = RateLimiter::new(Arc::new(MemoryWindowStore::new()), Arc::new(ManualClock::new(0)));
//! assert!(limiter.allow("addr:10.0.0.1", 1, Duration::from_secs(10)).await);
//! assert!(!limiter.allow("addr:10.0.0.1", 1, Duration::from_secs(10)).await);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(f)
//! # }
//! ```

mod errors;
mod key;
mod limiter;
mod memory;
mod redis_store;
mod window;

pub use errors::RateLimitError;
pub use key::KeyStrategy;
pub use limiter::{DEFAULT_STORE_TIMEOUT, RateLimiter};
pub use memory::MemoryWindowStore;
pub use redis_store::RedisWindowStore;
pub use window::{Decision, WindowStore};
