//! etcd client configuration

use serde::{Deserialize, Serialize};

/// Configuration for the etcd HTTP client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdClientConfig {
    /// Client URLs of the etcd members, tried in order on transport failure
    pub endpoints: Vec<String>,
    /// Username for basic authentication (empty: no auth)
    pub username: String,
    /// Password for basic authentication
    pub password: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Read timeout in milliseconds for non-watch requests
    pub read_timeout_ms: u64,
    /// Delay before a failed watch poll is retried, in milliseconds
    pub watch_retry_ms: u64,
    /// Path of the keys API (default: "/v2/keys")
    pub key_prefix: String,
}

impl Default for EtcdClientConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            username: String::new(),
            password: String::new(),
            connect_timeout_ms: 5000,
            read_timeout_ms: 30000,
            watch_retry_ms: 1000,
            key_prefix: "/v2/keys".to_string(),
        }
    }
}

impl EtcdClientConfig {
    /// Create a new config with a single endpoint
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoints: vec![endpoint.to_string()],
            ..Default::default()
        }
    }

    /// Create a config with multiple endpoints
    pub fn with_endpoints(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }

    /// Set authentication credentials
    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }

    /// Set timeouts
    pub fn with_timeouts(mut self, connect_ms: u64, read_ms: u64) -> Self {
        self.connect_timeout_ms = connect_ms;
        self.read_timeout_ms = read_ms;
        self
    }

    /// Set the watch retry delay
    pub fn with_watch_retry(mut self, retry_ms: u64) -> Self {
        self.watch_retry_ms = retry_ms;
        self
    }

    /// Set the keys API path
    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }

    pub fn has_auth(&self) -> bool {
        !self.username.is_empty()
    }
}
