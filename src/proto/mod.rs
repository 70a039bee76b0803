//! Protocol Buffer definitions and generated code for RPC services.

pub mod iris {
    tonic::include_proto!("iris");
}

pub mod consensus {
    tonic::include_proto!("consensus");
}

use bytes::Bytes;

use self::consensus::{log_entry::Payload, Command, CommandOp, LogEntry};

impl Command {
    pub(crate) fn set(source: &str, key: &str, value: Bytes) -> Self {
        Self {
            op: CommandOp::Set as i32,
            source: source.to_string(),
            key: key.to_string(),
            value,
        }
    }

    pub(crate) fn delete_key(source: &str, key: &str) -> Self {
        Self {
            op: CommandOp::DeleteKey as i32,
            source: source.to_string(),
            key: key.to_string(),
            value: Bytes::new(),
        }
    }

    pub(crate) fn delete_source(source: &str) -> Self {
        Self {
            op: CommandOp::DeleteSource as i32,
            source: source.to_string(),
            key: String::new(),
            value: Bytes::new(),
        }
    }
}

impl LogEntry {
    pub(crate) fn command(index: u64, term: u64, data: Bytes) -> Self {
        Self {
            index,
            term,
            payload: Some(Payload::Command(data)),
        }
    }

    pub(crate) fn config(index: u64, term: u64, voters: Vec<String>) -> Self {
        Self {
            index,
            term,
            payload: Some(Payload::Config(consensus::ClusterConfig { voters })),
        }
    }
}
