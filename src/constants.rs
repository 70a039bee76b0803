/// Default client-facing RPC port. The log transport always binds the next
/// port up; see [`RAFT_PORT_OFFSET`].
pub const DEFAULT_SERVICE_PORT: u16 = 32000;

/// Expected TLS common name for an iris server.
pub const DEFAULT_SERVER_NAME: &str = "Iris";

/// raft_port = service_port + RAFT_PORT_OFFSET, a process-wide invariant that
/// the leader proxy inverts to reach a leader's service endpoint.
pub const RAFT_PORT_OFFSET: u16 = 1;

/// Random bytes per session identifier; rendered as twice as many uppercase
/// hex characters.
pub(crate) const SESSION_ID_BYTES: usize = 10;

/// Buffer size of a session's update stream. A stream that stays full long
/// enough to overflow this drops updates for that session only.
pub(crate) const SESSION_STREAM_BUFFER: usize = 1024;

// -
// Sled tree namespaces

pub(crate) const RAFT_LOG_TREE: &str = "_raft_log";
pub(crate) const RAFT_STATE_TREE: &str = "_raft_state";
pub(crate) const RAFT_SNAPSHOT_TREE: &str = "_raft_snapshot";

// -
// Sled entry keys

pub(crate) const HARD_STATE_KEY: &str = "_hard_state";
pub(crate) const LAST_APPLIED_KEY: &str = "_last_applied";
pub(crate) const SNAPSHOT_IMAGE_KEY: &str = "_image";
