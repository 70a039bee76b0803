//! Durable storage for the replicated log.
//!
//! Three sled trees inside the node's raft directory: the entry log keyed by
//! big-endian index, a state tree for the hard state and applied cursor, and
//! a snapshot tree holding the latest image as one blob. The in-memory
//! first/last cursors are caches over the log tree.

use bytes::Bytes;
use prost::Message;
use serde::{Deserialize, Serialize};

use crate::constants::{
    HARD_STATE_KEY, LAST_APPLIED_KEY, RAFT_LOG_TREE, RAFT_SNAPSHOT_TREE, RAFT_STATE_TREE,
    SNAPSHOT_IMAGE_KEY,
};
use crate::errors::StorageError;
use crate::proto::consensus::{LogEntry, SnapshotImage};
use crate::Result;

/// Term, vote, and voter set surviving restarts. Written through on every
/// change; reread once at open.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct HardState {
    pub term: u64,
    pub voted_for: Option<String>,
    pub voters: Vec<String>,
}

pub(crate) struct RaftLog {
    log: sled::Tree,
    state: sled::Tree,
    snapshot: sled::Tree,
    first_index: u64,
    last_index: u64,
    snapshot_last_index: u64,
    snapshot_last_term: u64,
}

impl RaftLog {
    pub(crate) fn open(db: &sled::Db) -> Result<Self> {
        let log = db.open_tree(RAFT_LOG_TREE)?;
        let state = db.open_tree(RAFT_STATE_TREE)?;
        let snapshot = db.open_tree(RAFT_SNAPSHOT_TREE)?;

        let (snapshot_last_index, snapshot_last_term) = match snapshot.get(SNAPSHOT_IMAGE_KEY)? {
            Some(raw) => {
                let image = SnapshotImage::decode(raw.as_ref())?;
                (image.last_index, image.last_term)
            }
            None => (0, 0),
        };

        let first_index = match log.first()? {
            Some((key, _)) => decode_index(&key)?,
            None => snapshot_last_index + 1,
        };
        let last_index = match log.last()? {
            Some((key, _)) => decode_index(&key)?,
            None => snapshot_last_index,
        };

        Ok(Self {
            log,
            state,
            snapshot,
            first_index,
            last_index,
            snapshot_last_index,
            snapshot_last_term,
        })
    }

    /// Index of the first entry still present in the log tree.
    pub(crate) fn first_index(&self) -> u64 {
        self.first_index
    }

    pub(crate) fn last_index(&self) -> u64 {
        self.last_index
    }

    pub(crate) fn snapshot_last_index(&self) -> u64 {
        self.snapshot_last_index
    }

    pub(crate) fn snapshot_last_term(&self) -> u64 {
        self.snapshot_last_term
    }

    /// Appends entries and flushes them to disk before returning.
    pub(crate) fn append(&mut self, entries: &[LogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut batch = sled::Batch::default();
        for entry in entries {
            batch.insert(entry.index.to_be_bytes().as_slice(), entry.encode_to_vec());
        }
        self.log.apply_batch(batch)?;
        self.log.flush()?;
        self.last_index = entries.last().map(|e| e.index).unwrap_or(self.last_index);
        Ok(())
    }

    pub(crate) fn entry(&self, index: u64) -> Result<Option<LogEntry>> {
        match self.log.get(index.to_be_bytes())? {
            Some(raw) => Ok(Some(LogEntry::decode(raw.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Entries in `[from, to]`, capped at `max` items.
    pub(crate) fn entries(&self, from: u64, to: u64, max: u64) -> Result<Vec<LogEntry>> {
        let mut collected = Vec::new();
        let mut index = from;
        while index <= to && (collected.len() as u64) < max {
            let entry = self
                .entry(index)?
                .ok_or(StorageError::EntryNotFound(index))?;
            collected.push(entry);
            index += 1;
        }
        Ok(collected)
    }

    pub(crate) fn term_of(&self, index: u64) -> Result<u64> {
        if index == 0 {
            return Ok(0);
        }
        if index == self.snapshot_last_index {
            return Ok(self.snapshot_last_term);
        }
        let entry = self
            .entry(index)?
            .ok_or(StorageError::EntryNotFound(index))?;
        Ok(entry.term)
    }

    /// Removes every entry at `index` and above; used to drop a conflicting
    /// suffix before appending the leader's version.
    pub(crate) fn truncate_from(&mut self, index: u64) -> Result<()> {
        let mut batch = sled::Batch::default();
        for i in index..=self.last_index {
            batch.remove(i.to_be_bytes().as_slice());
        }
        self.log.apply_batch(batch)?;
        self.log.flush()?;
        self.last_index = index.saturating_sub(1).max(self.snapshot_last_index);
        Ok(())
    }

    pub(crate) fn hard_state(&self) -> Result<HardState> {
        match self.state.get(HARD_STATE_KEY)? {
            Some(raw) => Ok(bincode::deserialize(&raw)?),
            None => Ok(HardState::default()),
        }
    }

    pub(crate) fn set_hard_state(&self, hs: &HardState) -> Result<()> {
        self.state.insert(HARD_STATE_KEY, bincode::serialize(hs)?)?;
        self.state.flush()?;
        Ok(())
    }

    pub(crate) fn last_applied(&self) -> Result<u64> {
        match self.state.get(LAST_APPLIED_KEY)? {
            Some(raw) if raw.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&raw);
                Ok(u64::from_be_bytes(buf))
            }
            _ => Ok(0),
        }
    }

    /// Persists the applied cursor. Flushed before a proposer is acknowledged
    /// so a restart replays at least everything acknowledged.
    pub(crate) fn set_last_applied(&self, index: u64) -> Result<()> {
        self.state
            .insert(LAST_APPLIED_KEY, index.to_be_bytes().to_vec())?;
        self.state.flush()?;
        Ok(())
    }

    pub(crate) fn snapshot_image(&self) -> Result<Option<SnapshotImage>> {
        match self.snapshot.get(SNAPSHOT_IMAGE_KEY)? {
            Some(raw) => Ok(Some(SnapshotImage::decode(raw.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Raw encoded image, shipped verbatim to lagging peers.
    pub(crate) fn snapshot_blob(&self) -> Result<Option<Bytes>> {
        Ok(self
            .snapshot
            .get(SNAPSHOT_IMAGE_KEY)?
            .map(|raw| Bytes::copy_from_slice(&raw)))
    }

    /// Stores a new snapshot image and compacts the log prefix it covers.
    pub(crate) fn install_snapshot(&mut self, image: &SnapshotImage) -> Result<()> {
        self.snapshot
            .insert(SNAPSHOT_IMAGE_KEY, image.encode_to_vec())?;
        self.snapshot.flush()?;
        self.snapshot_last_index = image.last_index;
        self.snapshot_last_term = image.last_term;

        let mut batch = sled::Batch::default();
        let upper = self.last_index.min(image.last_index);
        for i in self.first_index..=upper {
            batch.remove(i.to_be_bytes().as_slice());
        }
        self.log.apply_batch(batch)?;
        self.log.flush()?;
        self.first_index = image.last_index + 1;
        if self.last_index < image.last_index {
            self.last_index = image.last_index;
        }
        Ok(())
    }

    /// Drops the whole entry log; used when a received snapshot supersedes it.
    pub(crate) fn reset_entries(&mut self) -> Result<()> {
        self.log.clear()?;
        self.log.flush()?;
        self.first_index = self.snapshot_last_index + 1;
        self.last_index = self.snapshot_last_index;
        Ok(())
    }
}

fn decode_index(key: &sled::IVec) -> Result<u64> {
    if key.len() != 8 {
        return Err(StorageError::EntryNotFound(0).into());
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(key);
    Ok(u64::from_be_bytes(buf))
}
