//! # iris
//!
//! A replicated key-value registry service with live change notification.
//!
//! Clients address data by a `(source, key)` pair, where a source is a named
//! namespace of keys and a value is an uninterpreted byte string. All
//! mutations are linearized through a replicated log; any surviving majority
//! of nodes continues service. Long-lived client streams receive updates for
//! the sources and keys they subscribed to.
//!
//! ## Quick start
//! ```no_run
//! use iris::{IrisConfig, NodeBuilder};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> iris::Result<()> {
//!     let config = IrisConfig::load()?;
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(());
//!
//!     let node = NodeBuilder::new(config, shutdown_rx)
//!         .build()
//!         .await?
//!         .start_rpc_server()
//!         .await?
//!         .ready()?;
//!
//!     node.run().await
//! }
//! ```

pub mod client;
pub mod config;
pub mod proto;

mod constants;
mod errors;
mod network;
mod node;
mod raft;
mod session;
mod store;
mod utils;

pub use client::{ClientTlsOptions, IrisClient};
pub use config::IrisConfig;
pub use constants::{DEFAULT_SERVER_NAME, DEFAULT_SERVICE_PORT};
pub use errors::{ConsensusError, Error, NetworkError, Result, SessionError, StorageError, SystemError};
pub use node::{Node, NodeBuilder};
pub use store::Store;
pub use utils::net::service_addr_of;
