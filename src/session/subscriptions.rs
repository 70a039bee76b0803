//! Subscription bookkeeping.
//!
//! Two independent structures, each behind its own lock: source→sessions and
//! source→key→sessions. All operations are idempotent so Subscribe and
//! Unsubscribe are safe to retry. Neither lock is ever held while the
//! sessions lock is taken.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

type SessionSet = HashSet<String>;

#[derive(Default)]
pub(crate) struct SubscriptionIndex {
    source_subs: Mutex<HashMap<String, SessionSet>>,
    key_subs: Mutex<HashMap<String, HashMap<String, SessionSet>>>,
}

impl SubscriptionIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn subscribe_source(&self, session: &str, source: &str) {
        let mut subs = self.lock_sources();
        subs.entry(source.to_string())
            .or_default()
            .insert(session.to_string());
    }

    pub(crate) fn unsubscribe_source(&self, session: &str, source: &str) {
        let mut subs = self.lock_sources();
        if let Some(sessions) = subs.get_mut(source) {
            sessions.remove(session);
            if sessions.is_empty() {
                subs.remove(source);
            }
        }
    }

    pub(crate) fn subscribe_key(&self, session: &str, source: &str, key: &str) {
        let mut subs = self.lock_keys();
        subs.entry(source.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .insert(session.to_string());
    }

    pub(crate) fn unsubscribe_key(&self, session: &str, source: &str, key: &str) {
        let mut subs = self.lock_keys();
        if let Some(keys) = subs.get_mut(source) {
            if let Some(sessions) = keys.get_mut(key) {
                sessions.remove(session);
                if sessions.is_empty() {
                    keys.remove(key);
                }
            }
            if keys.is_empty() {
                subs.remove(source);
            }
        }
    }

    /// Drops the session from every subscription set in both indices.
    pub(crate) fn remove_session(&self, session: &str) {
        {
            let mut subs = self.lock_sources();
            subs.retain(|_, sessions| {
                sessions.remove(session);
                !sessions.is_empty()
            });
        }
        let mut subs = self.lock_keys();
        subs.retain(|_, keys| {
            keys.retain(|_, sessions| {
                sessions.remove(session);
                !sessions.is_empty()
            });
            !keys.is_empty()
        });
    }

    /// Sessions to notify for a mutation of `(source, key)`: the union of the
    /// source's subscribers and the key's subscribers, deduplicated so a
    /// session subscribed to both receives a single notification.
    pub(crate) fn subscribers(&self, source: &str, key: &str) -> Vec<String> {
        let mut union: SessionSet = {
            let subs = self.lock_sources();
            subs.get(source).cloned().unwrap_or_default()
        };
        {
            let subs = self.lock_keys();
            if let Some(sessions) = subs.get(source).and_then(|keys| keys.get(key)) {
                union.extend(sessions.iter().cloned());
            }
        }
        union.into_iter().collect()
    }

    fn lock_sources(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionSet>> {
        self.source_subs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_keys(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, HashMap<String, SessionSet>>> {
        self.key_subs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
