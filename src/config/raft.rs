use std::time::Duration;

use config::ConfigError;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RaftConfig {
    /// Lower bound of the randomized election timeout.
    #[serde(default = "default_election_timeout_min_in_ms")]
    pub election_timeout_min_in_ms: u64,

    /// Upper bound of the randomized election timeout.
    #[serde(default = "default_election_timeout_max_in_ms")]
    pub election_timeout_max_in_ms: u64,

    /// Leader heartbeat / replication interval.
    #[serde(default = "default_heartbeat_interval_in_ms")]
    pub heartbeat_interval_in_ms: u64,

    /// Bound on a log submit, regardless of the caller's deadline.
    #[serde(default = "default_apply_timeout_in_ms")]
    pub apply_timeout_in_ms: u64,

    /// Entries applied since the last snapshot before a new one is taken.
    #[serde(default = "default_snapshot_threshold")]
    pub snapshot_threshold: u64,

    /// Cap on entries shipped in a single AppendEntries request.
    #[serde(default = "default_max_append_entries")]
    pub max_append_entries: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_in_ms: default_election_timeout_min_in_ms(),
            election_timeout_max_in_ms: default_election_timeout_max_in_ms(),
            heartbeat_interval_in_ms: default_heartbeat_interval_in_ms(),
            apply_timeout_in_ms: default_apply_timeout_in_ms(),
            snapshot_threshold: default_snapshot_threshold(),
            max_append_entries: default_max_append_entries(),
        }
    }
}

impl RaftConfig {
    pub fn apply_timeout(&self) -> Duration {
        Duration::from_millis(self.apply_timeout_in_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_in_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min_in_ms >= self.election_timeout_max_in_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "election timeout range [{}, {}] is empty",
                self.election_timeout_min_in_ms, self.election_timeout_max_in_ms
            ))));
        }
        if self.heartbeat_interval_in_ms >= self.election_timeout_min_in_ms {
            return Err(Error::Config(ConfigError::Message(
                "heartbeat interval must be shorter than the election timeout".into(),
            )));
        }
        if self.snapshot_threshold == 0 || self.max_append_entries == 0 {
            return Err(Error::Config(ConfigError::Message(
                "snapshot_threshold and max_append_entries must be non-zero".into(),
            )));
        }
        Ok(())
    }
}

fn default_election_timeout_min_in_ms() -> u64 {
    300
}

fn default_election_timeout_max_in_ms() -> u64 {
    600
}

fn default_heartbeat_interval_in_ms() -> u64 {
    75
}

fn default_apply_timeout_in_ms() -> u64 {
    10_000
}

fn default_snapshot_threshold() -> u64 {
    8_192
}

fn default_max_append_entries() -> u64 {
    256
}
