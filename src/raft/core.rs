//! Single-task consensus core.
//!
//! All consensus state lives on one task; peer RPC handlers and background
//! send tasks only exchange [`RaftEvent`]s with it. The loop alternates
//! between the election/heartbeat timer and the event channel, so entry
//! application is single-writer per node by construction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use prost::Message;
use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::{NetworkConfig, RaftConfig};
use crate::errors::{ConsensusError, StorageError};
use crate::proto::consensus::log_entry::Payload;
use crate::proto::consensus::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    LogEntry, SnapshotImage, VoteRequest, VoteResponse,
};
use crate::raft::transport::PeerClients;
use crate::raft::{
    HardState, PeerResult, RaftEvent, RaftHandle, RaftLog, RaftStatus, Role, StateMachine,
};
use crate::Result;

/// Capacity of the core's event channel; sized for a small cluster's RPC
/// fan-in plus client proposals.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub(crate) struct RaftCore {
    addr: String,
    config: RaftConfig,
    log: RaftLog,
    state_machine: Arc<dyn StateMachine>,

    role: Role,
    term: u64,
    voted_for: Option<String>,
    /// Full voter set including this node. Empty on a passive node that has
    /// not yet been added to a cluster.
    voters: Vec<String>,
    leader: String,

    commit_index: u64,
    last_applied: u64,
    next_index: HashMap<String, u64>,
    match_index: HashMap<String, u64>,
    votes_received: HashSet<String>,
    /// Proposers waiting for their entry to be applied, keyed by log index.
    pending: HashMap<u64, oneshot::Sender<Result<()>>>,
    /// Peers with an outstanding replication RPC.
    in_flight: HashSet<String>,

    clients: Arc<PeerClients>,
    event_tx: mpsc::Sender<RaftEvent>,
    event_rx: mpsc::Receiver<RaftEvent>,
    status_tx: watch::Sender<RaftStatus>,
    shutdown: watch::Receiver<()>,

    election_deadline: Instant,
    heartbeat_deadline: Instant,
}

impl RaftCore {
    /// Opens the durable state, restores the state machine from snapshot and
    /// log tail, and bootstraps leadership when configured. Returns the core
    /// (to be driven by [`RaftCore::run`]) and the handle the store consumes.
    pub(crate) fn open(
        addr: String,
        config: RaftConfig,
        network: &NetworkConfig,
        db: &sled::Db,
        state_machine: Arc<dyn StateMachine>,
        bootstrap: bool,
        shutdown: watch::Receiver<()>,
    ) -> Result<(Self, RaftHandle)> {
        let log = RaftLog::open(db)?;
        let hard_state = log.hard_state()?;
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(RaftStatus::unknown());

        let mut core = Self {
            addr,
            clients: Arc::new(PeerClients::new(network)),
            state_machine,
            role: Role::Follower,
            term: hard_state.term,
            voted_for: hard_state.voted_for,
            voters: hard_state.voters,
            leader: String::new(),
            commit_index: 0,
            last_applied: 0,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            votes_received: HashSet::new(),
            pending: HashMap::new(),
            in_flight: HashSet::new(),
            event_tx: event_tx.clone(),
            event_rx,
            status_tx,
            shutdown,
            election_deadline: Instant::now(),
            heartbeat_deadline: Instant::now(),
            log,
            config,
        };

        core.recover()?;

        if bootstrap && core.voters.iter().all(|v| v == &core.addr) {
            if core.voters.is_empty() {
                core.voters = vec![core.addr.clone()];
            }
            core.term += 1;
            core.voted_for = Some(core.addr.clone());
            core.persist_hard_state()?;
            core.become_leader();
            info!(addr = %core.addr, term = core.term, "bootstrapped as single-node leader");
        }

        core.reset_election_deadline();
        core.publish_status();

        let handle = RaftHandle::new(event_tx, status_rx, core.config.apply_timeout());
        Ok((core, handle))
    }

    /// Handle for the peer-facing RPC service.
    pub(crate) fn event_sender(&self) -> mpsc::Sender<RaftEvent> {
        self.event_tx.clone()
    }

    /// Rebuilds the in-memory state machine from the snapshot image plus the
    /// applied tail of the log.
    fn recover(&mut self) -> Result<()> {
        let mut from = 0;
        if let Some(image) = self.log.snapshot_image()? {
            from = image.last_index;
            if self.voters.is_empty() {
                self.voters = image.voters.clone();
            }
            self.state_machine.restore(image.sources);
        }

        let applied = self.log.last_applied()?.max(from);
        let replay_to = applied.min(self.log.last_index());
        for index in (from + 1)..=replay_to {
            let entry = self
                .log
                .entry(index)?
                .ok_or(StorageError::EntryNotFound(index))?;
            self.apply_entry(&entry);
        }
        self.last_applied = replay_to;
        self.commit_index = replay_to;
        if replay_to > 0 {
            debug!(applied = replay_to, "recovered state machine from log");
        }
        Ok(())
    }

    pub(crate) async fn run(mut self) {
        info!(addr = %self.addr, voters = ?self.voters, "replicated log core started");
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                _ = self.shutdown.changed() => {
                    info!(addr = %self.addr, "replicated log core stopping");
                    break;
                }
                received = self.event_rx.recv() => match received {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event) {
                            error!(error = %e, "failed to handle log event");
                        }
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    if let Err(e) = self.on_timer() {
                        error!(error = %e, "timer handling failed");
                    }
                }
            }
            self.publish_status();
        }
    }

    fn next_deadline(&self) -> Instant {
        match self.role {
            Role::Leader => self.heartbeat_deadline,
            _ if self.voters.contains(&self.addr) => self.election_deadline,
            // Passive node: wait to be contacted by a leader.
            _ => Instant::now() + std::time::Duration::from_secs(3600),
        }
    }

    fn on_timer(&mut self) -> Result<()> {
        match self.role {
            Role::Leader => {
                self.broadcast_append();
                Ok(())
            }
            _ => self.start_election(),
        }
    }

    fn handle_event(&mut self, event: RaftEvent) -> Result<()> {
        match event {
            RaftEvent::AppendEntries(request, reply) => {
                let response = self.handle_append_entries(request)?;
                let _ = reply.send(response);
                Ok(())
            }
            RaftEvent::RequestVote(request, reply) => {
                let response = self.handle_request_vote(request)?;
                let _ = reply.send(response);
                Ok(())
            }
            RaftEvent::InstallSnapshot(request, reply) => {
                let response = self.handle_install_snapshot(request)?;
                let _ = reply.send(response);
                Ok(())
            }
            RaftEvent::Propose { data, reply } => self.handle_propose(data, reply),
            RaftEvent::AddPeer { addr, reply } => self.handle_add_peer(addr, reply),
            RaftEvent::PeerResult(result) => self.handle_peer_result(result),
        }
    }

    // -
    // Client-facing paths

    fn handle_propose(&mut self, data: Bytes, reply: oneshot::Sender<Result<()>>) -> Result<()> {
        if self.role != Role::Leader {
            let _ = reply.send(Err(self.not_leader()));
            return Ok(());
        }
        let index = self.log.last_index() + 1;
        let entry = LogEntry::command(index, self.term, data);
        if let Err(e) = self.log.append(std::slice::from_ref(&entry)) {
            let _ = reply.send(Err(e));
            return Ok(());
        }
        self.pending.insert(index, reply);
        self.advance_commit()?;
        self.broadcast_append();
        Ok(())
    }

    fn handle_add_peer(&mut self, addr: String, reply: oneshot::Sender<Result<()>>) -> Result<()> {
        if self.role != Role::Leader {
            let _ = reply.send(Err(self.not_leader()));
            return Ok(());
        }
        if self.voters.contains(&addr) {
            info!(peer = %addr, "joining node is already a known peer");
            let _ = reply.send(Ok(()));
            return Ok(());
        }
        info!(peer = %addr, "adding peer to the cluster");

        let mut voters = self.voters.clone();
        voters.push(addr);
        let index = self.log.last_index() + 1;
        let entry = LogEntry::config(index, self.term, voters.clone());
        if let Err(e) = self.log.append(std::slice::from_ref(&entry)) {
            let _ = reply.send(Err(e));
            return Ok(());
        }
        self.pending.insert(index, reply);

        // The leader adopts the new configuration at append time so the
        // joiner starts receiving entries before the change commits.
        self.set_voters(voters)?;
        self.advance_commit()?;
        self.broadcast_append();
        Ok(())
    }

    fn not_leader(&self) -> crate::Error {
        ConsensusError::NotLeader {
            leader: if self.leader.is_empty() {
                None
            } else {
                Some(self.leader.clone())
            },
        }
        .into()
    }

    // -
    // Peer RPC handlers

    fn handle_append_entries(
        &mut self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        if request.term < self.term {
            return Ok(AppendEntriesResponse {
                term: self.term,
                success: false,
                match_index: self.log.last_index(),
            });
        }
        self.step_down(request.term);
        self.leader = request.leader.clone();
        self.reset_election_deadline();

        let snapshot_index = self.log.snapshot_last_index();
        let prev = request.prev_log_index;
        // Everything the request covers matches once the checks below pass,
        // including entries we already hold or that our snapshot subsumes.
        let match_index = request
            .entries
            .last()
            .map(|e| e.index)
            .unwrap_or(prev)
            .max(snapshot_index);
        if prev > snapshot_index {
            if prev > self.log.last_index() {
                return Ok(AppendEntriesResponse {
                    term: self.term,
                    success: false,
                    match_index: self.log.last_index(),
                });
            }
            if self.log.term_of(prev)? != request.prev_log_term {
                return Ok(AppendEntriesResponse {
                    term: self.term,
                    success: false,
                    match_index: prev.saturating_sub(1),
                });
            }
        }

        let mut to_append = Vec::new();
        for entry in request.entries {
            if entry.index <= snapshot_index {
                continue;
            }
            if entry.index <= self.log.last_index() {
                if self.log.term_of(entry.index)? == entry.term {
                    continue;
                }
                // Conflicting suffix: drop ours, take the leader's.
                self.log.truncate_from(entry.index)?;
            }
            to_append.push(entry);
        }
        self.log.append(&to_append)?;

        let new_commit = request.leader_commit.min(self.log.last_index());
        if new_commit > self.commit_index {
            self.commit_index = new_commit;
            self.apply_committed()?;
        }

        Ok(AppendEntriesResponse {
            term: self.term,
            success: true,
            match_index,
        })
    }

    fn handle_request_vote(&mut self, request: VoteRequest) -> Result<VoteResponse> {
        if request.term < self.term {
            return Ok(VoteResponse {
                term: self.term,
                vote_granted: false,
            });
        }
        if request.term > self.term {
            self.step_down(request.term);
        }

        let our_last_index = self.log.last_index();
        let our_last_term = self.log.term_of(our_last_index)?;
        let up_to_date = (request.last_log_term, request.last_log_index)
            >= (our_last_term, our_last_index);
        let free_to_vote = match &self.voted_for {
            None => true,
            Some(candidate) => candidate == &request.candidate,
        };

        if up_to_date && free_to_vote {
            debug!(candidate = %request.candidate, term = request.term, "granting vote");
            self.voted_for = Some(request.candidate);
            self.persist_hard_state()?;
            self.reset_election_deadline();
            return Ok(VoteResponse {
                term: self.term,
                vote_granted: true,
            });
        }
        Ok(VoteResponse {
            term: self.term,
            vote_granted: false,
        })
    }

    fn handle_install_snapshot(
        &mut self,
        request: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse> {
        if request.term < self.term {
            return Ok(InstallSnapshotResponse { term: self.term });
        }
        self.step_down(request.term);
        self.leader = request.leader.clone();
        self.reset_election_deadline();

        let image = SnapshotImage::decode(request.image.as_ref())?;
        if image.last_index <= self.log.snapshot_last_index() {
            return Ok(InstallSnapshotResponse { term: self.term });
        }
        info!(
            last_index = image.last_index,
            "installing snapshot from leader"
        );

        self.set_voters(image.voters.clone())?;
        self.state_machine.restore(image.sources.clone());
        self.log.install_snapshot(&image)?;
        self.log.reset_entries()?;
        self.commit_index = image.last_index;
        self.last_applied = image.last_index;
        self.log.set_last_applied(image.last_index)?;

        Ok(InstallSnapshotResponse { term: self.term })
    }

    // -
    // Elections

    fn start_election(&mut self) -> Result<()> {
        self.role = Role::Candidate;
        self.term += 1;
        self.voted_for = Some(self.addr.clone());
        self.persist_hard_state()?;
        self.leader.clear();
        self.votes_received.clear();
        self.votes_received.insert(self.addr.clone());
        self.reset_election_deadline();
        info!(term = self.term, "election timeout, requesting votes");

        if self.has_quorum(self.votes_received.len()) {
            self.become_leader();
            return Ok(());
        }

        let last_log_index = self.log.last_index();
        let last_log_term = self.log.term_of(last_log_index)?;
        for peer in self.peers() {
            let request = VoteRequest {
                term: self.term,
                candidate: self.addr.clone(),
                last_log_index,
                last_log_term,
            };
            let clients = self.clients.clone();
            let event_tx = self.event_tx.clone();
            let requested_term = self.term;
            tokio::spawn(async move {
                let response = clients
                    .request_vote(&peer, request)
                    .await
                    .map_err(|e| e.to_string());
                let _ = event_tx
                    .send(RaftEvent::PeerResult(PeerResult::Vote {
                        peer,
                        requested_term,
                        response,
                    }))
                    .await;
            });
        }
        Ok(())
    }

    fn become_leader(&mut self) {
        info!(addr = %self.addr, term = self.term, "elected leader");
        self.role = Role::Leader;
        self.leader = self.addr.clone();
        let next = self.log.last_index() + 1;
        self.next_index = self.peers().map(|p| (p, next)).collect();
        self.match_index = self.peers().map(|p| (p, 0)).collect();
        self.heartbeat_deadline = Instant::now();
        self.broadcast_append();
    }

    fn step_down(&mut self, term: u64) {
        if term > self.term {
            self.term = term;
            self.voted_for = None;
            self.leader.clear();
            if let Err(e) = self.persist_hard_state() {
                error!(error = %e, "failed to persist term change");
            }
        }
        if self.role == Role::Leader {
            warn!(term = self.term, "stepping down from leadership");
            for (_, reply) in self.pending.drain() {
                let _ = reply.send(Err(ConsensusError::NotLeader { leader: None }.into()));
            }
        }
        if self.role != Role::Follower {
            self.role = Role::Follower;
            self.leader.clear();
        }
        self.votes_received.clear();
    }

    // -
    // Replication

    fn broadcast_append(&mut self) {
        self.heartbeat_deadline = Instant::now() + self.config.heartbeat_interval();
        let peers: Vec<String> = self.peers().collect();
        for peer in peers {
            if !self.in_flight.contains(&peer) {
                if let Err(e) = self.send_append(&peer) {
                    debug!(peer = %peer, error = %e, "failed to start replication");
                }
            }
        }
    }

    fn send_append(&mut self, peer: &str) -> Result<()> {
        let next = *self
            .next_index
            .get(peer)
            .unwrap_or(&(self.log.last_index() + 1));

        if next <= self.log.snapshot_last_index() {
            return self.send_snapshot(peer);
        }

        let prev_log_index = next - 1;
        let prev_log_term = self.log.term_of(prev_log_index)?;
        let entries = self.log.entries(
            next,
            self.log.last_index(),
            self.config.max_append_entries,
        )?;
        let request = AppendEntriesRequest {
            term: self.term,
            leader: self.addr.clone(),
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: self.commit_index,
        };

        self.in_flight.insert(peer.to_string());
        let clients = self.clients.clone();
        let event_tx = self.event_tx.clone();
        let peer = peer.to_string();
        tokio::spawn(async move {
            let response = clients
                .append_entries(&peer, request)
                .await
                .map_err(|e| e.to_string());
            let _ = event_tx
                .send(RaftEvent::PeerResult(PeerResult::Append { peer, response }))
                .await;
        });
        Ok(())
    }

    fn send_snapshot(&mut self, peer: &str) -> Result<()> {
        let Some(image) = self.log.snapshot_blob()? else {
            return Err(StorageError::EntryNotFound(self.log.snapshot_last_index()).into());
        };
        let snapshot_index = self.log.snapshot_last_index();
        let request = InstallSnapshotRequest {
            term: self.term,
            leader: self.addr.clone(),
            image,
        };

        info!(peer = %peer, snapshot_index, "peer is behind the log, shipping snapshot");
        self.in_flight.insert(peer.to_string());
        let clients = self.clients.clone();
        let event_tx = self.event_tx.clone();
        let peer = peer.to_string();
        tokio::spawn(async move {
            let response = clients
                .install_snapshot(&peer, request)
                .await
                .map_err(|e| e.to_string());
            let _ = event_tx
                .send(RaftEvent::PeerResult(PeerResult::Snapshot {
                    peer,
                    snapshot_index,
                    response,
                }))
                .await;
        });
        Ok(())
    }

    fn handle_peer_result(&mut self, result: PeerResult) -> Result<()> {
        match result {
            PeerResult::Append { peer, response } => {
                self.in_flight.remove(&peer);
                let response = match response {
                    Ok(r) => r,
                    Err(e) => {
                        trace!(peer = %peer, error = %e, "append_entries failed");
                        return Ok(());
                    }
                };
                if response.term > self.term {
                    self.step_down(response.term);
                    return Ok(());
                }
                if self.role != Role::Leader {
                    return Ok(());
                }
                if response.success {
                    let matched = self.match_index.entry(peer.clone()).or_insert(0);
                    *matched = (*matched).max(response.match_index);
                    self.next_index
                        .insert(peer.clone(), response.match_index + 1);
                    self.advance_commit()?;
                    if response.match_index < self.log.last_index() {
                        self.send_append(&peer)?;
                    }
                } else {
                    // Back off using the follower's hint and retry.
                    let next = self.next_index.entry(peer.clone()).or_insert(1);
                    *next = (*next).saturating_sub(1).min(response.match_index + 1).max(1);
                    self.send_append(&peer)?;
                }
                Ok(())
            }
            PeerResult::Vote {
                peer,
                requested_term,
                response,
            } => {
                let response = match response {
                    Ok(r) => r,
                    Err(e) => {
                        trace!(peer = %peer, error = %e, "request_vote failed");
                        return Ok(());
                    }
                };
                if response.term > self.term {
                    self.step_down(response.term);
                    return Ok(());
                }
                if self.role != Role::Candidate || requested_term != self.term {
                    return Ok(());
                }
                if response.vote_granted {
                    self.votes_received.insert(peer);
                    if self.has_quorum(self.votes_received.len()) {
                        self.become_leader();
                    }
                }
                Ok(())
            }
            PeerResult::Snapshot {
                peer,
                snapshot_index,
                response,
            } => {
                self.in_flight.remove(&peer);
                let response = match response {
                    Ok(r) => r,
                    Err(e) => {
                        debug!(peer = %peer, error = %e, "install_snapshot failed");
                        return Ok(());
                    }
                };
                if response.term > self.term {
                    self.step_down(response.term);
                    return Ok(());
                }
                if self.role != Role::Leader {
                    return Ok(());
                }
                self.match_index.insert(peer.clone(), snapshot_index);
                self.next_index.insert(peer.clone(), snapshot_index + 1);
                if snapshot_index < self.log.last_index() {
                    self.send_append(&peer)?;
                }
                Ok(())
            }
        }
    }

    // -
    // Commit and apply

    fn advance_commit(&mut self) -> Result<()> {
        let last = self.log.last_index();
        let mut new_commit = self.commit_index;
        for index in (self.commit_index + 1)..=last {
            // Only entries from the current term commit by counting.
            if self.log.term_of(index)? != self.term {
                continue;
            }
            let replicas = 1 + self
                .match_index
                .iter()
                .filter(|(peer, matched)| self.voters.contains(*peer) && **matched >= index)
                .count();
            if self.has_quorum(replicas) {
                new_commit = index;
            }
        }
        if new_commit > self.commit_index {
            self.commit_index = new_commit;
            self.apply_committed()?;
        }
        Ok(())
    }

    fn apply_committed(&mut self) -> Result<()> {
        if self.last_applied >= self.commit_index {
            return Ok(());
        }
        let mut acks = Vec::new();
        while self.last_applied < self.commit_index {
            let index = self.last_applied + 1;
            let entry = self
                .log
                .entry(index)?
                .ok_or(StorageError::EntryNotFound(index))?;
            self.apply_entry(&entry);
            self.last_applied = index;
            if let Some(reply) = self.pending.remove(&index) {
                acks.push(reply);
            }
        }
        // Persist the applied cursor before acknowledging, so a restart
        // replays at least everything a client saw committed.
        self.log.set_last_applied(self.last_applied)?;
        for reply in acks {
            let _ = reply.send(Ok(()));
        }
        self.maybe_snapshot()?;
        Ok(())
    }

    fn apply_entry(&mut self, entry: &LogEntry) {
        match &entry.payload {
            Some(Payload::Command(data)) => self.state_machine.apply(data),
            Some(Payload::Config(config)) => {
                info!(voters = ?config.voters, index = entry.index, "applying cluster configuration");
                if let Err(e) = self.set_voters(config.voters.clone()) {
                    error!(error = %e, "failed to persist cluster configuration");
                }
            }
            // An unknown entry must not stall the log.
            None => warn!(index = entry.index, "discarding log entry with no payload"),
        }
    }

    fn maybe_snapshot(&mut self) -> Result<()> {
        let covered = self.last_applied - self.log.snapshot_last_index();
        if covered < self.config.snapshot_threshold {
            return Ok(());
        }
        let last_term = self.log.term_of(self.last_applied)?;
        let image = SnapshotImage {
            last_index: self.last_applied,
            last_term,
            sources: self.state_machine.capture(),
            voters: self.voters.clone(),
        };
        info!(
            last_index = image.last_index,
            sources = image.sources.len(),
            "taking snapshot and compacting log"
        );
        self.log.install_snapshot(&image)?;
        Ok(())
    }

    // -
    // Shared helpers

    fn set_voters(&mut self, voters: Vec<String>) -> Result<()> {
        if self.voters != voters {
            for peer in voters.iter().filter(|v| *v != &self.addr) {
                self.next_index
                    .entry(peer.clone())
                    .or_insert(self.log.last_index() + 1);
                self.match_index.entry(peer.clone()).or_insert(0);
            }
            self.next_index.retain(|peer, _| voters.contains(peer));
            self.match_index.retain(|peer, _| voters.contains(peer));
            self.voters = voters;
        }
        self.persist_hard_state()
    }

    fn persist_hard_state(&self) -> Result<()> {
        self.log.set_hard_state(&HardState {
            term: self.term,
            voted_for: self.voted_for.clone(),
            voters: self.voters.clone(),
        })
    }

    fn peers(&self) -> impl Iterator<Item = String> + '_ {
        self.voters
            .iter()
            .filter(move |v| *v != &self.addr)
            .cloned()
    }

    fn has_quorum(&self, count: usize) -> bool {
        count * 2 > self.voters.len()
    }

    fn reset_election_deadline(&mut self) {
        let timeout = rand::thread_rng().gen_range(
            self.config.election_timeout_min_in_ms..=self.config.election_timeout_max_in_ms,
        );
        self.election_deadline = Instant::now() + std::time::Duration::from_millis(timeout);
    }

    fn publish_status(&self) {
        self.status_tx.send_if_modified(|status| {
            let current = RaftStatus {
                role: self.role,
                leader: self.leader.clone(),
                term: self.term,
            };
            if *status != current {
                *status = current;
                true
            } else {
                false
            }
        });
    }
}
