//! Update fan-out, decoupled from the apply path.
//!
//! The state machine enqueues events on an unbounded channel; this single
//! task drains it in log order and delivers to each matching session's
//! stream. The subscription snapshot is taken under the subscription locks
//! and released before any stream is touched; sends never block, so one slow
//! session cannot stall the commit path or its neighbors.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::proto::iris::Update;
use crate::session::{SessionRegistry, SubscriptionIndex};
use crate::store::PublishEvent;

pub(crate) struct Publisher {
    events: mpsc::UnboundedReceiver<PublishEvent>,
    sessions: Arc<SessionRegistry>,
    subscriptions: Arc<SubscriptionIndex>,
}

impl Publisher {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<PublishEvent>,
        sessions: Arc<SessionRegistry>,
        subscriptions: Arc<SubscriptionIndex>,
    ) -> Self {
        Self {
            events,
            sessions,
            subscriptions,
        }
    }

    /// Runs until the state machine side of the event channel closes.
    pub(crate) async fn run(mut self) {
        debug!("publisher started");
        while let Some(event) = self.events.recv().await {
            self.dispatch(event);
        }
        debug!("publisher stopped");
    }

    fn dispatch(&self, event: PublishEvent) {
        let targets = self.subscriptions.subscribers(&event.source, &event.key);
        if targets.is_empty() {
            return;
        }

        let update = Update {
            source: event.source,
            key: event.key,
            value: event.value,
        };
        for session in targets {
            // A session without an attached stream has nothing to deliver to
            // yet; it keeps its subscriptions for when Listen arrives.
            let Some(stream) = self.sessions.stream(&session) else {
                continue;
            };
            match stream.try_send(Ok(update.clone())) {
                Ok(()) => {
                    trace!(session = %session, source = %update.source, key = %update.key, "update delivered")
                }
                // A per-session fault: log it and move on. The session is
                // only removed when its stream terminates.
                Err(e) => warn!(session = %session, error = %e, "failed to deliver update"),
            }
        }
    }
}
