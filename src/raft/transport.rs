//! Peer-facing RPC clients.
//!
//! Channels are created lazily and cached per peer address; tonic reconnects
//! a lazy channel on demand, so a cached entry survives peer restarts. Every
//! call is bounded by the configured request timeout.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tonic::transport::{Channel, Endpoint};

use crate::config::NetworkConfig;
use crate::errors::NetworkError;
use crate::proto::consensus::consensus_client::ConsensusClient;
use crate::proto::consensus::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use crate::utils::net::endpoint_uri;
use crate::Result;

pub(crate) struct PeerClients {
    channels: Mutex<HashMap<String, Channel>>,
    connect_timeout: Duration,
    request_timeout: Duration,
    tcp_nodelay: bool,
}

impl PeerClients {
    pub(crate) fn new(network: &NetworkConfig) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            connect_timeout: network.connect_timeout(),
            request_timeout: network.request_timeout(),
            tcp_nodelay: network.tcp_nodelay,
        }
    }

    pub(crate) async fn append_entries(
        &self,
        addr: &str,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        let mut client = ConsensusClient::new(self.channel(addr)?);
        let response = self
            .bounded(addr, client.append_entries(request))
            .await??;
        Ok(response.into_inner())
    }

    pub(crate) async fn request_vote(
        &self,
        addr: &str,
        request: VoteRequest,
    ) -> Result<VoteResponse> {
        let mut client = ConsensusClient::new(self.channel(addr)?);
        let response = self.bounded(addr, client.request_vote(request)).await??;
        Ok(response.into_inner())
    }

    pub(crate) async fn install_snapshot(
        &self,
        addr: &str,
        request: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse> {
        let mut client = ConsensusClient::new(self.channel(addr)?);
        let response = self
            .bounded(addr, client.install_snapshot(request))
            .await??;
        Ok(response.into_inner())
    }

    async fn bounded<F, T>(&self, addr: &str, call: F) -> Result<std::result::Result<T, tonic::Status>>
    where
        F: std::future::Future<Output = std::result::Result<T, tonic::Status>>,
    {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => Ok(result),
            Err(_) => Err(NetworkError::Timeout {
                addr: addr.to_string(),
                duration: self.request_timeout,
            }
            .into()),
        }
    }

    fn channel(&self, addr: &str) -> Result<Channel> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(channel) = channels.get(addr) {
            return Ok(channel.clone());
        }
        let endpoint = Endpoint::from_shared(endpoint_uri(addr))
            .map_err(|_| NetworkError::InvalidAddress(addr.to_string()))?
            .connect_timeout(self.connect_timeout)
            .tcp_nodelay(self.tcp_nodelay);
        let channel = endpoint.connect_lazy();
        channels.insert(addr.to_string(), channel.clone());
        Ok(channel)
    }
}
