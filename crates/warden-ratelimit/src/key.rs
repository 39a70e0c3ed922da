use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How the limiter buckets callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    /// Client network address.
    #[default]
    Address,
    /// Authenticated subject, falling back to the address for anonymous calls.
    Identity,
}

impl KeyStrategy {
    pub fn resolve(self, address: Option<&str>, subject: Option<&str>) -> String {
        let address = address.filter(|value| !value.is_empty()).unwrap_or("unknown");
        match (self, subject.filter(|value| !value.is_empty())) {
            (KeyStrategy::Identity, Some(subject)) => format!("sub:{subject}"),
            _ => format!("addr:{address}"),
        }
    }
}

impl FromStr for KeyStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "address" | "ip" => Ok(Self::Address),
            "identity" | "subject" => Ok(Self::Identity),
            other => Err(format!("unknown rate limit key strategy: {other}")),
        }
    }
}
