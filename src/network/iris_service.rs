//! The registry service façade.
//!
//! Validates inbound requests, routes writes, joins, and reads to the leader
//! through the proxy when this node is a follower, and translates everything
//! else into store and subscription calls. Reads are leader-only so a client
//! always observes its own writes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use crate::constants::SESSION_STREAM_BUFFER;
use crate::network::Proxy;
use crate::proto::iris::iris_server::Iris;
use crate::proto::iris::{
    ConnectRequest, ConnectResponse, GetKeysRequest, GetKeysResponse, GetSourcesRequest,
    GetSourcesResponse, GetValueRequest, GetValueResponse, JoinRequest, JoinResponse,
    ListenRequest, RemoveSourceRequest, RemoveSourceResponse, RemoveValueRequest,
    RemoveValueResponse, SetValueRequest, SetValueResponse, SubscribeKeyRequest,
    SubscribeKeyResponse, SubscribeRequest, SubscribeResponse, UnsubscribeKeyRequest,
    UnsubscribeKeyResponse, UnsubscribeRequest, UnsubscribeResponse, Update,
};
use crate::errors::SessionError;
use crate::session::{SessionRegistry, SubscriptionIndex};
use crate::{Error, IrisClient, Store};

pub(crate) struct IrisService {
    store: Arc<Store>,
    sessions: Arc<SessionRegistry>,
    subscriptions: Arc<SubscriptionIndex>,
    proxy: Option<Proxy>,
}

impl IrisService {
    pub(crate) fn new(
        store: Arc<Store>,
        sessions: Arc<SessionRegistry>,
        subscriptions: Arc<SubscriptionIndex>,
        proxy: Option<Proxy>,
    ) -> Self {
        Self {
            store,
            sessions,
            subscriptions,
            proxy,
        }
    }

    /// Short-lived client to the current leader, for requests this follower
    /// cannot serve itself.
    async fn dial_leader(&self) -> Result<IrisClient, Status> {
        let Some(proxy) = &self.proxy else {
            return Err(Status::unavailable(
                "not the cluster leader and no proxy is configured",
            ));
        };
        let leader = self.store.leader();
        if leader.is_empty() {
            return Err(Status::unavailable("not the cluster leader; leader unknown"));
        }
        debug!(leader = %leader, "forwarding request to leader");
        Ok(proxy.client(&leader).await?)
    }

    /// Sessions are node-local; subscription operations require one that was
    /// registered here by Connect or Listen.
    fn require_registered(&self, session: &str) -> Result<(), Status> {
        require("session", session)?;
        if !self.sessions.contains(session) {
            return Err(Error::from(SessionError::Unknown(session.to_string())).into());
        }
        Ok(())
    }
}

fn require(field: &'static str, value: &str) -> Result<(), Status> {
    if value.is_empty() {
        return Err(Error::InvalidArgument(format!("you must provide a {field}")).into());
    }
    Ok(())
}

/// Streams a prepared listing to the client one item at a time.
fn stream_items<T: Send + 'static>(items: Vec<T>) -> ReceiverStream<Result<T, Status>> {
    let (tx, rx) = mpsc::channel(items.len().max(1));
    tokio::spawn(async move {
        for item in items {
            if tx.send(Ok(item)).await.is_err() {
                break;
            }
        }
    });
    ReceiverStream::new(rx)
}

#[tonic::async_trait]
impl Iris for IrisService {
    type ListenStream = ReceiverStream<Result<Update, Status>>;
    type GetSourcesStream = ReceiverStream<Result<GetSourcesResponse, Status>>;
    type GetKeysStream = ReceiverStream<Result<GetKeysResponse, Status>>;

    async fn join(
        &self,
        request: Request<JoinRequest>,
    ) -> Result<Response<JoinResponse>, Status> {
        let req = request.into_inner();
        require("address", &req.address)?;

        if !self.store.is_leader() {
            let mut client = self.dial_leader().await?;
            client.join(&req.address).await?;
            return Ok(Response::new(JoinResponse {}));
        }

        self.store.join(&req.address).await?;
        Ok(Response::new(JoinResponse {}))
    }

    async fn connect(
        &self,
        _request: Request<ConnectRequest>,
    ) -> Result<Response<ConnectResponse>, Status> {
        let session = self.sessions.connect();
        Ok(Response::new(ConnectResponse { session }))
    }

    async fn listen(
        &self,
        request: Request<ListenRequest>,
    ) -> Result<Response<Self::ListenStream>, Status> {
        let req = request.into_inner();
        require("session", &req.session)?;

        let (tx, rx) = mpsc::channel(SESSION_STREAM_BUFFER);
        self.sessions.attach(&req.session, tx.clone());
        info!(session = %req.session, "listen stream opened");

        // The session lives for as long as the client holds the stream open;
        // when the receiver side drops, tear the session down.
        let sessions = self.sessions.clone();
        let subscriptions = self.subscriptions.clone();
        let session = req.session;
        tokio::spawn(async move {
            tx.closed().await;
            subscriptions.remove_session(&session);
            sessions.detach(&session);
            info!(session = %session, "listen stream closed");
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn get_sources(
        &self,
        request: Request<GetSourcesRequest>,
    ) -> Result<Response<Self::GetSourcesStream>, Status> {
        let req = request.into_inner();
        require("session", &req.session)?;

        let sources = if self.store.is_leader() {
            self.store.get_sources()
        } else {
            self.dial_leader().await?.get_sources(&req.session).await?
        };

        let items = sources
            .into_iter()
            .map(|source| GetSourcesResponse { source })
            .collect();
        Ok(Response::new(stream_items(items)))
    }

    async fn get_keys(
        &self,
        request: Request<GetKeysRequest>,
    ) -> Result<Response<Self::GetKeysStream>, Status> {
        let req = request.into_inner();
        require("session", &req.session)?;
        require("source", &req.source)?;

        let keys = if self.store.is_leader() {
            self.store.get_keys(&req.source)
        } else {
            self.dial_leader()
                .await?
                .get_keys(&req.session, &req.source)
                .await?
        };

        let items = keys.into_iter().map(|key| GetKeysResponse { key }).collect();
        Ok(Response::new(stream_items(items)))
    }

    async fn set_value(
        &self,
        request: Request<SetValueRequest>,
    ) -> Result<Response<SetValueResponse>, Status> {
        let req = request.into_inner();
        require("session", &req.session)?;
        require("source", &req.source)?;
        require("key", &req.key)?;

        if !self.store.is_leader() {
            let mut client = self.dial_leader().await?;
            let value = client
                .set_value(&req.session, &req.source, &req.key, req.value)
                .await?;
            return Ok(Response::new(SetValueResponse { value }));
        }

        self.store.set(&req.source, &req.key, req.value.clone()).await?;
        Ok(Response::new(SetValueResponse { value: req.value }))
    }

    async fn get_value(
        &self,
        request: Request<GetValueRequest>,
    ) -> Result<Response<GetValueResponse>, Status> {
        let req = request.into_inner();
        require("session", &req.session)?;
        require("source", &req.source)?;
        require("key", &req.key)?;

        if !self.store.is_leader() {
            let mut client = self.dial_leader().await?;
            let value = client.get_value(&req.session, &req.source, &req.key).await?;
            return Ok(Response::new(GetValueResponse { value }));
        }

        let value = self.store.get(&req.source, &req.key);
        Ok(Response::new(GetValueResponse { value }))
    }

    async fn remove_value(
        &self,
        request: Request<RemoveValueRequest>,
    ) -> Result<Response<RemoveValueResponse>, Status> {
        let req = request.into_inner();
        require("session", &req.session)?;
        require("source", &req.source)?;
        require("key", &req.key)?;

        if !self.store.is_leader() {
            let mut client = self.dial_leader().await?;
            client
                .remove_value(&req.session, &req.source, &req.key)
                .await?;
        } else {
            self.store.delete_key(&req.source, &req.key).await?;
        }

        Ok(Response::new(RemoveValueResponse {
            session: req.session,
            source: req.source,
            key: req.key,
        }))
    }

    async fn remove_source(
        &self,
        request: Request<RemoveSourceRequest>,
    ) -> Result<Response<RemoveSourceResponse>, Status> {
        let req = request.into_inner();
        require("session", &req.session)?;
        require("source", &req.source)?;

        if !self.store.is_leader() {
            let mut client = self.dial_leader().await?;
            client.remove_source(&req.session, &req.source).await?;
        } else {
            self.store.delete_source(&req.source).await?;
        }

        Ok(Response::new(RemoveSourceResponse {
            session: req.session,
            source: req.source,
        }))
    }

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<SubscribeResponse>, Status> {
        let req = request.into_inner();
        self.require_registered(&req.session)?;
        require("source", &req.source)?;

        self.subscriptions.subscribe_source(&req.session, &req.source);
        debug!(session = %req.session, source = %req.source, "subscribed to source");
        Ok(Response::new(SubscribeResponse { source: req.source }))
    }

    async fn subscribe_key(
        &self,
        request: Request<SubscribeKeyRequest>,
    ) -> Result<Response<SubscribeKeyResponse>, Status> {
        let req = request.into_inner();
        self.require_registered(&req.session)?;
        require("source", &req.source)?;
        require("key", &req.key)?;

        self.subscriptions
            .subscribe_key(&req.session, &req.source, &req.key);
        debug!(session = %req.session, source = %req.source, key = %req.key, "subscribed to key");
        Ok(Response::new(SubscribeKeyResponse {
            source: req.source,
            key: req.key,
        }))
    }

    async fn unsubscribe(
        &self,
        request: Request<UnsubscribeRequest>,
    ) -> Result<Response<UnsubscribeResponse>, Status> {
        let req = request.into_inner();
        self.require_registered(&req.session)?;
        require("source", &req.source)?;

        self.subscriptions
            .unsubscribe_source(&req.session, &req.source);
        Ok(Response::new(UnsubscribeResponse { source: req.source }))
    }

    async fn unsubscribe_key(
        &self,
        request: Request<UnsubscribeKeyRequest>,
    ) -> Result<Response<UnsubscribeKeyResponse>, Status> {
        let req = request.into_inner();
        self.require_registered(&req.session)?;
        require("source", &req.source)?;
        require("key", &req.key)?;

        self.subscriptions
            .unsubscribe_key(&req.session, &req.source, &req.key);
        Ok(Response::new(UnsubscribeKeyResponse {
            source: req.source,
            key: req.key,
        }))
    }
}
