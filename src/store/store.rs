//! Façade over the replicated log and the state machine.
//!
//! Owns no data, only the path through the log: mutations are encoded as
//! commands and submitted for replication, reads come straight from the
//! state machine under its lock. Writes are gated on leadership; the RPC
//! layer routes rejected writes through the proxy.

use std::sync::Arc;

use bytes::Bytes;
use prost::Message;

use crate::errors::ConsensusError;
use crate::proto::consensus::Command;
use crate::raft::RaftHandle;
use crate::store::Fsm;
use crate::Result;

pub struct Store {
    raft: RaftHandle,
    fsm: Arc<Fsm>,
}

impl Store {
    pub(crate) fn new(raft: RaftHandle, fsm: Arc<Fsm>) -> Self {
        Self { raft, fsm }
    }

    /// Whether this node is currently the cluster leader.
    pub fn is_leader(&self) -> bool {
        self.raft.is_leader()
    }

    /// Raft address of the current leader, or an empty string when unknown.
    pub fn leader(&self) -> String {
        self.raft.leader()
    }

    /// Current value for `(source, key)`; empty when absent. Intended to be
    /// called on the leader for read-your-writes freshness.
    pub fn get(&self, source: &str, key: &str) -> Bytes {
        self.fsm.get(source, key)
    }

    /// Snapshot of current source names.
    pub fn get_sources(&self) -> Vec<String> {
        self.fsm.sources()
    }

    /// Snapshot of current key names for a source; empty when absent.
    pub fn get_keys(&self, source: &str) -> Vec<String> {
        self.fsm.keys(source)
    }

    /// Stores a value, replacing any previous one. Returns once the entry is
    /// committed and applied locally.
    pub async fn set(&self, source: &str, key: &str, value: Bytes) -> Result<()> {
        self.submit(Command::set(source, key, value)).await
    }

    /// Removes a key. Removing an absent key is a committed no-op.
    pub async fn delete_key(&self, source: &str, key: &str) -> Result<()> {
        self.submit(Command::delete_key(source, key)).await
    }

    /// Removes a source and every key in it.
    pub async fn delete_source(&self, source: &str) -> Result<()> {
        self.submit(Command::delete_source(source)).await
    }

    /// Adds the node at the given raft address to the cluster. Adding a known
    /// peer is treated as success.
    pub async fn join(&self, addr: &str) -> Result<()> {
        if !self.is_leader() {
            return Err(self.not_leader());
        }
        self.raft.add_peer(addr.to_string()).await
    }

    async fn submit(&self, command: Command) -> Result<()> {
        if !self.is_leader() {
            return Err(self.not_leader());
        }
        self.raft.propose(command.encode_to_vec().into()).await
    }

    fn not_leader(&self) -> crate::Error {
        let leader = self.leader();
        ConsensusError::NotLeader {
            leader: (!leader.is_empty()).then_some(leader),
        }
        .into()
    }
}
