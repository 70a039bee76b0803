//! Error hierarchy for the registry service, categorized by subsystem.
//!
//! Every variant maps to exactly one RPC status code at the service boundary;
//! see the `From<Error> for tonic::Status` implementation at the bottom.

use std::time::Duration;

use config::ConfigError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Infrastructure-level failures (network, storage, serialization)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Replicated-log failures (leadership, commit, membership)
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// Client session failures
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A required request field was missing or empty
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("node failed to start: {0}")]
    NodeStartFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// gRPC transport layer errors
    #[error(transparent)]
    Transport(#[from] Box<tonic::transport::Error>),

    /// gRPC status errors from a remote call
    #[error(transparent)]
    Status(#[from] Box<tonic::Status>),

    /// Malformed peer or leader address
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Peer communication timeout
    #[error("request to {addr} timed out after {duration:?}")]
    Timeout { addr: String, duration: Duration },
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures during log or snapshot operations
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Embedded database errors
    #[error(transparent)]
    Db(#[from] sled::Error),

    /// Serialization failures for persisted hard state
    #[error(transparent)]
    Bincode(#[from] bincode::Error),

    /// Protobuf decoding failures for persisted entries
    #[error(transparent)]
    Decode(#[from] prost::DecodeError),

    /// Log entry missing where one must exist
    #[error("log entry {0} not found")]
    EntryNotFound(u64),
}

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// Write or membership change issued to a non-leader
    #[error("not the cluster leader (known leader: {leader:?})")]
    NotLeader { leader: Option<String> },

    /// Log submit exceeded the bounded apply timeout
    #[error("commit timed out after {0:?}")]
    CommitTimeout(Duration),

    /// The consensus core has shut down
    #[error("replicated log is not running")]
    CoreStopped,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} is not registered")]
    Unknown(String),
}

// ============== Conversion Implementations ============== //

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::System(SystemError::Network(e))
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(e: tonic::transport::Error) -> Self {
        NetworkError::Transport(Box::new(e)).into()
    }
}

impl From<tonic::Status> for Error {
    fn from(e: tonic::Status) -> Self {
        NetworkError::Status(Box::new(e)).into()
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        StorageError::Db(e).into()
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e).into()
    }
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        StorageError::Decode(e).into()
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        StorageError::Bincode(e).into()
    }
}

/// RPC boundary mapping. Proxied errors already carrying a status are passed
/// through verbatim.
impl From<Error> for tonic::Status {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidArgument(msg) => tonic::Status::invalid_argument(msg),
            Error::Session(SessionError::Unknown(id)) => {
                tonic::Status::not_found(format!("session {id} is not registered"))
            }
            Error::Consensus(ConsensusError::NotLeader { leader }) => tonic::Status::unavailable(
                match leader {
                    Some(addr) if !addr.is_empty() => {
                        format!("not the cluster leader; current leader at {addr}")
                    }
                    _ => "not the cluster leader; leader unknown".to_string(),
                },
            ),
            Error::Consensus(ConsensusError::CommitTimeout(d)) => {
                tonic::Status::deadline_exceeded(format!("commit timed out after {d:?}"))
            }
            Error::System(SystemError::Network(NetworkError::Status(status))) => *status,
            other => tonic::Status::internal(other.to_string()),
        }
    }
}
