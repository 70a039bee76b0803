//! Address helpers tying the two listeners of a node together.
//!
//! Every node binds its log transport on `service_port + 1`. The leader's
//! identity inside the replicated log is its raft address, so reaching a
//! leader's client-facing endpoint means mapping that address back down one
//! port.

use crate::errors::NetworkError;
use crate::Result;

/// Computes the client-facing service address for a raft transport address.
pub fn service_addr_of(raft_addr: &str) -> Result<String> {
    let (host, port) = split_host_port(raft_addr)?;
    if port == 0 {
        return Err(NetworkError::InvalidAddress(raft_addr.to_string()).into());
    }
    Ok(format!("{host}:{}", port - 1))
}

/// Formats an address as a tonic endpoint URI.
pub(crate) fn endpoint_uri(addr: &str) -> String {
    format!("http://{addr}")
}

fn split_host_port(addr: &str) -> Result<(&str, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| NetworkError::InvalidAddress(addr.to_string()))?;
    if host.is_empty() {
        return Err(NetworkError::InvalidAddress(addr.to_string()).into());
    }
    let port: u16 = port
        .parse()
        .map_err(|_| NetworkError::InvalidAddress(addr.to_string()))?;
    Ok((host, port))
}
