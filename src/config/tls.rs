use std::path::Path;

use config::ConfigError;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_SERVER_NAME;
use crate::{Error, Result};

/// TLS material for the client-facing port. The leader proxy dials other
/// nodes with the same material, mirroring the inbound security posture.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TlsConfig {
    /// Disables TLS on the RPC port, allowing unencrypted communication.
    #[serde(default)]
    pub insecure: bool,

    /// Server certificate chain path in PEM format.
    #[serde(default = "default_certificate_path")]
    pub certificate_path: String,

    /// Server private key path in PEM format.
    #[serde(default = "default_private_key_path")]
    pub private_key_path: String,

    /// Certificate authority root used to verify peers on proxy dials.
    /// Empty means the system roots.
    #[serde(default)]
    pub certificate_authority_path: String,

    /// Expected common name of peer servers.
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            insecure: false,
            certificate_path: default_certificate_path(),
            private_key_path: default_private_key_path(),
            certificate_authority_path: String::new(),
            server_name: default_server_name(),
        }
    }
}

impl TlsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.insecure {
            return Ok(());
        }

        self.require_file(&self.certificate_path, "server certificate")?;
        self.require_file(&self.private_key_path, "server private key")?;
        if !self.certificate_authority_path.is_empty() {
            self.require_file(&self.certificate_authority_path, "CA certificate")?;
        }
        if self.server_name.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "server_name must not be empty when TLS is enabled".into(),
            )));
        }
        Ok(())
    }

    fn require_file(&self, path: &str, name: &str) -> Result<()> {
        if path.is_empty() {
            return Err(Error::Config(ConfigError::Message(format!(
                "{name} path must be provided when TLS is enabled"
            ))));
        }
        if !Path::new(path).exists() {
            return Err(Error::Config(ConfigError::Message(format!(
                "{name} file {path} not found"
            ))));
        }
        Ok(())
    }
}

fn default_certificate_path() -> String {
    "./server.cer".into()
}

fn default_private_key_path() -> String {
    "./server.key".into()
}

fn default_server_name() -> String {
    DEFAULT_SERVER_NAME.into()
}
