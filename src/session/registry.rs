//! The set of live client sessions.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::mpsc;
use tracing::debug;

use crate::constants::SESSION_ID_BYTES;
use crate::proto::iris::Update;

/// Delivery end of a session's Listen stream.
pub(crate) type UpdateSender = mpsc::Sender<Result<Update, tonic::Status>>;

struct Session {
    stream: Option<UpdateSender>,
}

/// Registry of live sessions. Identifiers are unique process-wide; the
/// stream handle is borrowed by the publisher only long enough to clone the
/// sender under the lock.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Creates a session with no stream and returns its identifier. A
    /// colliding identifier is regenerated.
    pub(crate) fn connect(&self) -> String {
        let mut sessions = self.lock();
        loop {
            let id = generate_session_id();
            if sessions.contains_key(&id) {
                continue;
            }
            debug!(session = %id, "session connected");
            sessions.insert(id.clone(), Session { stream: None });
            return id;
        }
    }

    /// Attaches a delivery stream. An absent session is created; this is the
    /// tolerant path used by Listen, which may race Connect retries.
    pub(crate) fn attach(&self, id: &str, stream: UpdateSender) {
        let mut sessions = self.lock();
        debug!(session = %id, "stream attached");
        sessions.insert(
            id.to_string(),
            Session {
                stream: Some(stream),
            },
        );
    }

    /// Removes a session. Idempotent; the caller also clears its
    /// subscriptions.
    pub(crate) fn detach(&self, id: &str) {
        if self.lock().remove(id).is_some() {
            debug!(session = %id, "session detached");
        }
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// The session's stream sender, if the session exists and Listen has
    /// attached one.
    pub(crate) fn stream(&self, id: &str) -> Option<UpdateSender> {
        self.lock().get(id).and_then(|s| s.stream.clone())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 10 cryptographically-random bytes rendered as 20 uppercase hex chars.
fn generate_session_id() -> String {
    let mut raw = [0u8; SESSION_ID_BYTES];
    OsRng.fill_bytes(&mut raw);
    raw.iter().map(|b| format!("{b:02X}")).collect()
}

#[cfg(test)]
pub(crate) fn session_id_for_test() -> String {
    generate_session_id()
}
