//! Client-facing RPC layer: server bootstrap, the registry service façade,
//! and the leader proxy.

mod iris_service;
mod proxy;

#[cfg(test)]
mod proxy_test;

pub(crate) use iris_service::IrisService;
pub(crate) use proxy::Proxy;

use std::net::SocketAddr;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{info, warn};
use tonic::transport::{Identity, ServerTlsConfig};

use crate::config::IrisConfig;
use crate::proto::iris::iris_server::IrisServer;
use crate::Result;

/// Runs the client-facing RPC listener until shutdown, TLS-wrapped unless
/// the node is configured insecure.
pub(crate) async fn start_rpc_server(
    service: IrisService,
    listen_address: SocketAddr,
    config: IrisConfig,
    mut shutdown: watch::Receiver<()>,
) -> Result<()> {
    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<IrisServer<IrisService>>()
        .await;

    let network = &config.network;
    let mut server_builder = tonic::transport::Server::builder()
        .tcp_nodelay(network.tcp_nodelay)
        .http2_keepalive_interval(Some(Duration::from_secs(
            network.http2_keepalive_interval_in_secs,
        )))
        .http2_keepalive_timeout(Some(Duration::from_secs(
            network.http2_keepalive_timeout_in_secs,
        )));

    if !config.tls.insecure {
        let cert = tokio::fs::read(&config.tls.certificate_path).await?;
        let key = tokio::fs::read(&config.tls.private_key_path).await?;
        let identity = Identity::from_pem(cert, key);
        server_builder = server_builder.tls_config(ServerTlsConfig::new().identity(identity))?;
        info!("TLS enabled on the RPC port");
    }

    info!(%listen_address, "serving registry RPCs");
    server_builder
        .add_service(health_service)
        .add_service(IrisServer::new(service))
        .serve_with_shutdown(
            listen_address,
            shutdown.changed().map(move |_| {
                warn!(%listen_address, "stopping RPC server");
            }),
        )
        .await?;
    Ok(())
}
