use std::sync::Arc;

use tokio::sync::watch;

use crate::config::IrisConfig;
use crate::{Result, Store};

/// A running iris node. The replicated log core, the publisher, and both
/// listeners run on background tasks spawned by the builder; this handle
/// holds the store façade and the shutdown signal.
pub struct Node {
    pub(crate) config: IrisConfig,
    pub(crate) store: Arc<Store>,
    pub(crate) shutdown: watch::Receiver<()>,
}

impl Node {
    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }

    pub fn config(&self) -> &IrisConfig {
        &self.config
    }

    /// Blocks until the shutdown signal fires. Dropping the shutdown sender
    /// counts as a shutdown.
    pub async fn run(mut self) -> Result<()> {
        let _ = self.shutdown.changed().await;
        Ok(())
    }
}
