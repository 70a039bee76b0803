//! The registry state machine.
//!
//! Owns the storage map exclusively. Committed commands arrive one at a time
//! in log order; each successful mutation emits publish events after the
//! state change is visible, collected under the storage lock but enqueued to
//! the publisher only after the lock is released.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use prost::Message;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::proto::consensus::{Command, CommandOp, SnapshotEntry, SnapshotSource};
use crate::raft::StateMachine;

/// A committed mutation fanned out to subscribed sessions. Deletions carry an
/// empty value.
#[derive(Debug, Clone)]
pub(crate) struct PublishEvent {
    pub source: String,
    pub key: String,
    pub value: Bytes,
}

type Storage = HashMap<String, HashMap<String, Bytes>>;

pub(crate) struct Fsm {
    storage: Mutex<Storage>,
    publish_tx: mpsc::UnboundedSender<PublishEvent>,
}

impl Fsm {
    pub(crate) fn new(publish_tx: mpsc::UnboundedSender<PublishEvent>) -> Self {
        Self {
            storage: Mutex::new(HashMap::new()),
            publish_tx,
        }
    }

    /// Current value for `(source, key)`. Missing source or key yields an
    /// empty value; an empty value is indistinguishable from an absent key.
    pub(crate) fn get(&self, source: &str, key: &str) -> Bytes {
        let storage = self.lock();
        storage
            .get(source)
            .and_then(|keys| keys.get(key))
            .cloned()
            .unwrap_or_default()
    }

    /// Names of all sources currently holding at least one key.
    pub(crate) fn sources(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Key names for a source; empty when the source is absent.
    pub(crate) fn keys(&self, source: &str) -> Vec<String> {
        self.lock()
            .get(source)
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Storage> {
        self.storage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, events: Vec<PublishEvent>) {
        for event in events {
            if self.publish_tx.send(event).is_err() {
                trace!("publisher stopped, dropping update");
            }
        }
    }

    fn apply_set(&self, source: String, key: String, value: Bytes) -> Vec<PublishEvent> {
        let mut storage = self.lock();
        debug!(source = %source, key = %key, len = value.len(), "SET");
        storage
            .entry(source.clone())
            .or_default()
            .insert(key.clone(), value.clone());
        vec![PublishEvent { source, key, value }]
    }

    fn apply_delete_key(&self, source: String, key: String) -> Vec<PublishEvent> {
        let mut storage = self.lock();
        let Some(keys) = storage.get_mut(&source) else {
            return Vec::new();
        };
        if keys.remove(&key).is_none() {
            // Absent key: no phantom notification, the apply is a no-op.
            return Vec::new();
        }
        debug!(source = %source, key = %key, "DELETE key");
        if keys.is_empty() {
            storage.remove(&source);
        }
        vec![PublishEvent {
            source,
            key,
            value: Bytes::new(),
        }]
    }

    fn apply_delete_source(&self, source: String) -> Vec<PublishEvent> {
        let mut storage = self.lock();
        let Some(keys) = storage.remove(&source) else {
            return Vec::new();
        };
        debug!(source = %source, keys = keys.len(), "DELETE source");
        keys.into_keys()
            .map(|key| PublishEvent {
                source: source.clone(),
                key,
                value: Bytes::new(),
            })
            .collect()
    }
}

impl StateMachine for Fsm {
    fn apply(&self, data: &[u8]) {
        let command = match Command::decode(data) {
            Ok(command) => command,
            Err(e) => {
                // A malformed command must not stall the log.
                error!(error = %e, "failed to decode command, discarding");
                return;
            }
        };

        let events = match command.op() {
            CommandOp::Set => self.apply_set(command.source, command.key, command.value),
            CommandOp::DeleteKey => self.apply_delete_key(command.source, command.key),
            CommandOp::DeleteSource => self.apply_delete_source(command.source),
            CommandOp::Unknown => {
                error!(op = command.op, "unrecognized command operation, discarding");
                Vec::new()
            }
        };
        self.publish(events);
    }

    fn capture(&self) -> Vec<SnapshotSource> {
        let storage = self.lock();
        storage
            .iter()
            .map(|(source, keys)| SnapshotSource {
                source: source.clone(),
                entries: keys
                    .iter()
                    .map(|(key, value)| SnapshotEntry {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect(),
            })
            .collect()
    }

    fn restore(&self, sources: Vec<SnapshotSource>) {
        let mut storage: Storage = HashMap::with_capacity(sources.len());
        for snapshot_source in sources {
            let keys = snapshot_source
                .entries
                .into_iter()
                .map(|entry| (entry.key, entry.value))
                .collect();
            storage.insert(snapshot_source.source, keys);
        }
        *self.lock() = storage;
    }
}
