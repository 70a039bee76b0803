//! Client sessions and the subscription/notification engine.
//!
//! A session is created by Connect (no stream), promoted by Listen (stream
//! attached), and destroyed when the stream ends. Subscriptions record the
//! session's interest in a source or a single key; the publisher fans
//! committed mutations out to the union of matching sessions.

mod publisher;
mod registry;
mod subscriptions;

#[cfg(test)]
mod subscriptions_test;

pub(crate) use publisher::Publisher;
pub(crate) use registry::SessionRegistry;
pub(crate) use subscriptions::SubscriptionIndex;
