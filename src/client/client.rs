//! Typed client over the registry RPC surface.
//!
//! Used by applications, by the integration tests, and internally by the
//! leader proxy, which dials a short-lived client per forwarded call.

use std::time::Duration;

use bytes::Bytes;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tonic::Streaming;

use crate::config::TlsConfig;
use crate::errors::NetworkError;
use crate::proto::iris::iris_client::IrisClient as GrpcClient;
use crate::proto::iris::{
    ConnectRequest, GetKeysRequest, GetSourcesRequest, GetValueRequest, JoinRequest,
    ListenRequest, RemoveSourceRequest, RemoveValueRequest, SetValueRequest, SubscribeKeyRequest,
    SubscribeRequest, UnsubscribeKeyRequest, UnsubscribeRequest, Update,
};
use crate::utils::net::endpoint_uri;
use crate::Result;

/// TLS material for dialing a server. Mirrors the server-side posture: the
/// same CA, client identity, and expected server name.
#[derive(Debug, Clone)]
pub struct ClientTlsOptions {
    pub server_name: String,
    /// CA bundle verifying the server; empty uses the system roots.
    pub certificate_authority_path: String,
    /// Client identity presented to the server; empty presents none.
    pub certificate_path: String,
    pub private_key_path: String,
}

impl ClientTlsOptions {
    /// Derives dial options from a node's own TLS configuration, or `None`
    /// when the node runs insecure.
    pub fn mirror(tls: &TlsConfig) -> Option<Self> {
        if tls.insecure {
            return None;
        }
        Some(Self {
            server_name: tls.server_name.clone(),
            certificate_authority_path: tls.certificate_authority_path.clone(),
            certificate_path: tls.certificate_path.clone(),
            private_key_path: tls.private_key_path.clone(),
        })
    }

    async fn into_tls_config(self) -> Result<ClientTlsConfig> {
        let mut config = ClientTlsConfig::new().domain_name(self.server_name);
        if !self.certificate_authority_path.is_empty() {
            let ca = tokio::fs::read(&self.certificate_authority_path).await?;
            config = config.ca_certificate(Certificate::from_pem(ca));
        }
        if !self.certificate_path.is_empty() {
            let cert = tokio::fs::read(&self.certificate_path).await?;
            let key = tokio::fs::read(&self.private_key_path).await?;
            config = config.identity(Identity::from_pem(cert, key));
        }
        Ok(config)
    }
}

pub struct IrisClient {
    inner: GrpcClient<Channel>,
}

impl IrisClient {
    /// Dials a server at `host:port` and fails if it is unreachable within
    /// the connect timeout.
    pub async fn connect(
        addr: &str,
        tls: Option<ClientTlsOptions>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let mut endpoint = Endpoint::from_shared(endpoint_uri(addr))
            .map_err(|_| NetworkError::InvalidAddress(addr.to_string()))?
            .connect_timeout(connect_timeout);
        if let Some(tls) = tls {
            endpoint = endpoint.tls_config(tls.into_tls_config().await?)?;
        }
        let channel = endpoint.connect().await?;
        Ok(Self {
            inner: GrpcClient::new(channel),
        })
    }

    /// Asks the cluster to add the node at the given raft address.
    pub async fn join(&mut self, address: &str) -> Result<()> {
        self.inner
            .join(JoinRequest {
                address: address.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Allocates a session identifier.
    pub async fn connect_session(&mut self) -> Result<String> {
        let response = self.inner.connect(ConnectRequest {}).await?;
        Ok(response.into_inner().session)
    }

    /// Attaches an update stream to the session. The stream stays open until
    /// dropped or the server goes away.
    pub async fn listen(&mut self, session: &str) -> Result<Streaming<Update>> {
        let response = self
            .inner
            .listen(ListenRequest {
                session: session.to_string(),
            })
            .await?;
        Ok(response.into_inner())
    }

    pub async fn get_sources(&mut self, session: &str) -> Result<Vec<String>> {
        let mut stream = self
            .inner
            .get_sources(GetSourcesRequest {
                session: session.to_string(),
            })
            .await?
            .into_inner();
        let mut sources = Vec::new();
        while let Some(item) = stream.message().await? {
            sources.push(item.source);
        }
        Ok(sources)
    }

    pub async fn get_keys(&mut self, session: &str, source: &str) -> Result<Vec<String>> {
        let mut stream = self
            .inner
            .get_keys(GetKeysRequest {
                session: session.to_string(),
                source: source.to_string(),
            })
            .await?
            .into_inner();
        let mut keys = Vec::new();
        while let Some(item) = stream.message().await? {
            keys.push(item.key);
        }
        Ok(keys)
    }

    /// Stores a value; the response echoes the stored bytes.
    pub async fn set_value(
        &mut self,
        session: &str,
        source: &str,
        key: &str,
        value: Bytes,
    ) -> Result<Bytes> {
        let response = self
            .inner
            .set_value(SetValueRequest {
                session: session.to_string(),
                source: source.to_string(),
                key: key.to_string(),
                value,
            })
            .await?;
        Ok(response.into_inner().value)
    }

    /// Current value; empty both for an absent key and for a stored empty
    /// value. Probe existence with [`IrisClient::get_keys`].
    pub async fn get_value(&mut self, session: &str, source: &str, key: &str) -> Result<Bytes> {
        let response = self
            .inner
            .get_value(GetValueRequest {
                session: session.to_string(),
                source: source.to_string(),
                key: key.to_string(),
            })
            .await?;
        Ok(response.into_inner().value)
    }

    pub async fn remove_value(&mut self, session: &str, source: &str, key: &str) -> Result<()> {
        self.inner
            .remove_value(RemoveValueRequest {
                session: session.to_string(),
                source: source.to_string(),
                key: key.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn remove_source(&mut self, session: &str, source: &str) -> Result<()> {
        self.inner
            .remove_source(RemoveSourceRequest {
                session: session.to_string(),
                source: source.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn subscribe(&mut self, session: &str, source: &str) -> Result<()> {
        self.inner
            .subscribe(SubscribeRequest {
                session: session.to_string(),
                source: source.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn subscribe_key(&mut self, session: &str, source: &str, key: &str) -> Result<()> {
        self.inner
            .subscribe_key(SubscribeKeyRequest {
                session: session.to_string(),
                source: source.to_string(),
                key: key.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn unsubscribe(&mut self, session: &str, source: &str) -> Result<()> {
        self.inner
            .unsubscribe(UnsubscribeRequest {
                session: session.to_string(),
                source: source.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn unsubscribe_key(&mut self, session: &str, source: &str, key: &str) -> Result<()> {
        self.inner
            .unsubscribe_key(UnsubscribeKeyRequest {
                session: session.to_string(),
                source: source.to_string(),
                key: key.to_string(),
            })
            .await?;
        Ok(())
    }
}
