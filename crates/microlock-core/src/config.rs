//! Lock configuration
//!
//! `LockConfig` is the serde-friendly description of a lock, suitable for
//! loading from files or the environment. TTL values coming from text sources
//! are validated here the same way as TTLs passed in code.

use serde::{Deserialize, Serialize};

use crate::error::{LockError, Result};

/// Lease applied when no TTL is given.
pub const DEFAULT_TTL_SECONDS: u64 = 1;

/// Shortest lease a lock will request; shorter leases are raised to this.
pub const MIN_TTL_SECONDS: u64 = 1;

/// Clamp a TTL in whole seconds to the minimum lease.
pub fn clamp_ttl(ttl: i64) -> u64 {
    if ttl < MIN_TTL_SECONDS as i64 {
        MIN_TTL_SECONDS
    } else {
        ttl as u64
    }
}

/// Parse a TTL given as text.
///
/// Anything numeric is accepted: values below one second are clamped up and
/// fractional seconds are rounded up, since the store leases whole seconds.
/// Values beyond the range of an `i64` are rejected rather than saturated.
pub fn parse_ttl(raw: &str) -> Result<u64> {
    let text = raw.trim();
    if let Ok(secs) = text.parse::<i64>() {
        return Ok(clamp_ttl(secs));
    }

    let value: f64 = text
        .parse()
        .map_err(|_| LockError::InvalidTtl(raw.to_string()))?;

    // 2^63: the first float past i64::MAX
    if !value.is_finite() || value >= 9_223_372_036_854_775_808.0 {
        return Err(LockError::InvalidTtl(raw.to_string()));
    }
    if value < MIN_TTL_SECONDS as f64 {
        return Ok(MIN_TTL_SECONDS);
    }
    Ok(value.ceil() as u64)
}

/// Declarative lock settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Store key representing the lock
    pub key: Option<String>,
    /// Identity of this node or process
    pub holder_id: Option<String>,
    /// Lease in seconds; numbers and numeric strings are both accepted
    #[serde(deserialize_with = "lenient_ttl::deserialize")]
    pub ttl: Option<String>,
}

impl LockConfig {
    pub fn new(key: &str, holder_id: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            holder_id: Some(holder_id.to_string()),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl.to_string());
        self
    }

    /// Effective lease in seconds.
    pub fn ttl_seconds(&self) -> Result<u64> {
        match &self.ttl {
            Some(raw) => parse_ttl(raw),
            None => Ok(DEFAULT_TTL_SECONDS),
        }
    }
}

/// TTL deserialization accepting both JSON numbers and strings.
/// Config sources deliver environment values as strings, files as numbers.
mod lenient_ttl {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<serde_json::Value> = Option::deserialize(deserializer)?;
        match opt {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s)),
            Some(other) => Ok(Some(other.to_string())),
        }
    }
}
