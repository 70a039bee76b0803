//! Configuration management for an iris node.
//!
//! Hierarchical loading with:
//! - Default values as code base
//! - Configuration file support (`CONFIG_PATH`)
//! - Environment variable overrides (`IRIS__` prefix)
//! - Component-wise validation
//!
//! Command-line flags are applied on top by the binary after loading.

mod cluster;
mod network;
mod raft;
mod tls;

pub use cluster::*;
pub use network::*;
pub use raft::*;
pub use tls::*;


use std::env;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Main configuration container for an iris node.
///
/// Sources are merged in order, later ones overriding earlier ones:
/// 1. Type defaults
/// 2. Configuration file named by the `CONFIG_PATH` environment variable
/// 3. Environment variables with the `IRIS__` prefix (highest priority)
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct IrisConfig {
    /// Node addressing, log directory, and join target
    pub cluster: ClusterConfig,
    /// Network communication parameters
    pub network: NetworkConfig,
    /// Replicated-log timing and snapshot parameters
    pub raft: RaftConfig,
    /// TLS material for the client-facing port and proxy dials
    pub tls: TlsConfig,
}

impl IrisConfig {
    /// Loads the merged configuration and validates it.
    ///
    /// ```ignore
    /// std::env::set_var("CONFIG_PATH", "config/node1.toml");
    /// std::env::set_var("IRIS__CLUSTER__SERVICE_PORT", "32100");
    /// let cfg = IrisConfig::load()?;
    /// ```
    pub fn load() -> Result<Self> {
        let config = Self::load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the merged configuration without validating it; the binary uses
    /// this to apply command-line overrides before validation.
    pub fn load_unvalidated() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path));
        }

        builder = builder.add_source(
            Environment::with_prefix("IRIS")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Validates cross-component configuration rules.
    pub fn validate(&self) -> Result<()> {
        self.cluster.validate()?;
        self.network.validate()?;
        self.raft.validate()?;
        self.tls.validate()?;
        Ok(())
    }
}
