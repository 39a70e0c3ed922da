// Shared data types and small helpers used across warden crates.
use serde::{Deserialize, Serialize};
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
}

pub mod clock {
    // Time sources. Everything that compares against "now" takes a clock so
    // expiry and window maths can be driven from tests.
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub trait Clock: Send + Sync + 'static {
        fn now_millis(&self) -> i64;

        fn now_secs(&self) -> i64 {
            self.now_millis().div_euclid(1000)
        }
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now_millis(&self) -> i64 {
            // Clamp to zero if the wall clock is before the epoch.
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_else(|_| Duration::from_secs(0))
                .as_millis() as i64
        }
    }

    // Manually advanced clock for tests and simulations.
    #[derive(Debug, Default)]
    pub struct ManualClock {
        millis: AtomicI64,
    }

    impl ManualClock {
        pub fn new(start_millis: i64) -> Self {
            Self {
                millis: AtomicI64::new(start_millis),
            }
        }

        pub fn starting_now() -> Self {
            Self::new(SystemClock.now_millis())
        }

        pub fn advance(&self, by: Duration) {
            self.millis
                .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
        }

        pub fn set_millis(&self, millis: i64) {
            self.millis.store(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> i64 {
            self.millis.load(Ordering::SeqCst)
        }
    }
}

pub use clock::{Clock, ManualClock, SystemClock};

/// Identity resolved from a validated access token.
///
/// Published into the request context by the authentication stage and read
/// by the authorization stage and handlers.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub subject_id: String,
    pub display_name: String,
    pub role: String,
}

impl Identity {
    pub fn new(
        subject_id: impl Into<String>,
        display_name: impl Into<String>,
        role: impl Into<String>,
    ) -> Result<Self> {
        let identity = Self {
            subject_id: subject_id.into(),
            display_name: display_name.into(),
            role: role.into(),
        };
        if identity.subject_id.is_empty() {
            return Err(Error::InvalidIdentity("empty subject id".into()));
        }
        if identity.role.is_empty() {
            return Err(Error::InvalidIdentity("empty role".into()));
        }
        Ok(identity)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.subject_id, self.role)
    }
}

// Extract the credential from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() { None } else { Some(token) }
}
