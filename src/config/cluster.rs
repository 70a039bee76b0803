use std::net::SocketAddr;
use std::path::PathBuf;

use config::ConfigError;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_SERVICE_PORT, RAFT_PORT_OFFSET};
use crate::{Error, Result};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    /// Host the RPC and log transports bind to, and the host peers use to
    /// reach this node.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Client-facing RPC port. The log transport always binds
    /// `service_port + 1`.
    #[serde(default = "default_service_port")]
    pub service_port: u16,

    /// Directory holding the replicated log, hard state, and snapshots.
    #[serde(default = "default_raft_dir")]
    pub raft_dir: PathBuf,

    /// Service address of an existing cluster member to join. Absent means
    /// bootstrap as the leader of a new cluster.
    #[serde(default)]
    pub join_address: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            service_port: default_service_port(),
            raft_dir: default_raft_dir(),
            join_address: None,
        }
    }
}

impl ClusterConfig {
    /// Whether this node bootstraps a new single-node cluster.
    pub fn bootstrap(&self) -> bool {
        self.join_address.is_none()
    }

    /// Socket address of the client-facing RPC listener.
    pub fn service_socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.service_port)
            .parse()
            .map_err(|e| {
                Error::Config(ConfigError::Message(format!(
                    "invalid bind address {}:{}: {e}",
                    self.bind_address, self.service_port
                )))
            })
    }

    /// Socket address of the peer-facing log transport listener.
    pub fn raft_socket_addr(&self) -> Result<SocketAddr> {
        self.raft_addr().parse().map_err(|e| {
            Error::Config(ConfigError::Message(format!(
                "invalid raft bind address {}: {e}",
                self.raft_addr()
            )))
        })
    }

    /// Advertised log transport address, `bind_address:(service_port + 1)`.
    pub fn raft_addr(&self) -> String {
        format!(
            "{}:{}",
            self.bind_address,
            self.service_port + RAFT_PORT_OFFSET
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.bind_address.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "bind_address must not be empty".into(),
            )));
        }
        if self.service_port == 0 || self.service_port == u16::MAX {
            return Err(Error::Config(ConfigError::Message(format!(
                "service_port {} leaves no room for the log transport port",
                self.service_port
            ))));
        }
        if let Some(join) = &self.join_address {
            if join.is_empty() {
                return Err(Error::Config(ConfigError::Message(
                    "join_address must not be empty when set".into(),
                )));
            }
        }
        Ok(())
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_service_port() -> u16 {
    DEFAULT_SERVICE_PORT
}

fn default_raft_dir() -> PathBuf {
    PathBuf::from("./raftDir")
}
