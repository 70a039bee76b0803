use std::time::Duration;

use config::ConfigError;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    /// Dial timeout for peer and proxy connections.
    #[serde(default = "default_connect_timeout_in_ms")]
    pub connect_timeout_in_ms: u64,

    /// Per-call timeout for peer RPCs.
    #[serde(default = "default_request_timeout_in_ms")]
    pub request_timeout_in_ms: u64,

    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,

    #[serde(default = "default_http2_keepalive_interval_in_secs")]
    pub http2_keepalive_interval_in_secs: u64,

    #[serde(default = "default_http2_keepalive_timeout_in_secs")]
    pub http2_keepalive_timeout_in_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_in_ms: default_connect_timeout_in_ms(),
            request_timeout_in_ms: default_request_timeout_in_ms(),
            tcp_nodelay: default_tcp_nodelay(),
            http2_keepalive_interval_in_secs: default_http2_keepalive_interval_in_secs(),
            http2_keepalive_timeout_in_secs: default_http2_keepalive_timeout_in_secs(),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_in_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_in_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_in_ms == 0 || self.request_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "network timeouts must be non-zero".into(),
            )));
        }
        Ok(())
    }
}

fn default_connect_timeout_in_ms() -> u64 {
    3_000
}

fn default_request_timeout_in_ms() -> u64 {
    5_000
}

fn default_tcp_nodelay() -> bool {
    true
}

fn default_http2_keepalive_interval_in_secs() -> u64 {
    20
}

fn default_http2_keepalive_timeout_in_secs() -> u64 {
    10
}
