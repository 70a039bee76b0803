//! Leader routing for requests that land on a follower.
//!
//! The log transport listens on `service_port + 1`, so the leader's
//! client-facing endpoint is its raft address mapped down one port. Each
//! forwarded call dials a short-lived client with the node's own security
//! posture; there is no retry, no connection caching, and leadership is not
//! re-resolved mid-call. Dial and remote errors surface to the caller
//! verbatim.

use std::time::Duration;

use crate::client::{ClientTlsOptions, IrisClient};
use crate::config::{NetworkConfig, TlsConfig};
use crate::utils::net::service_addr_of;
use crate::Result;

pub(crate) struct Proxy {
    tls: Option<ClientTlsOptions>,
    connect_timeout: Duration,
}

impl Proxy {
    pub(crate) fn new(tls: &TlsConfig, network: &NetworkConfig) -> Self {
        Self {
            tls: ClientTlsOptions::mirror(tls),
            connect_timeout: network.connect_timeout(),
        }
    }

    /// Service endpoint for a leader's raft address.
    pub(crate) fn service_addr(&self, leader_raft_addr: &str) -> Result<String> {
        service_addr_of(leader_raft_addr)
    }

    /// Dials the leader's service endpoint.
    pub(crate) async fn client(&self, leader_raft_addr: &str) -> Result<IrisClient> {
        let addr = self.service_addr(leader_raft_addr)?;
        IrisClient::connect(&addr, self.tls.clone(), self.connect_timeout).await
    }
}
