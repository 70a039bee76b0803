use super::*;

#[test]
fn source_subscription_matches_every_key() {
    let index = SubscriptionIndex::new();
    index.subscribe_source("S1", "colors");

    assert_eq!(index.subscribers("colors", "primary"), vec!["S1".to_string()]);
    assert_eq!(index.subscribers("colors", "secondary"), vec!["S1".to_string()]);
    assert!(index.subscribers("shapes", "round").is_empty());
}

#[test]
fn key_subscription_matches_only_that_key() {
    let index = SubscriptionIndex::new();
    index.subscribe_key("S1", "colors", "primary");

    assert_eq!(index.subscribers("colors", "primary"), vec!["S1".to_string()]);
    assert!(index.subscribers("colors", "secondary").is_empty());
}

#[test]
fn subscribe_is_idempotent() {
    let index = SubscriptionIndex::new();
    index.subscribe_source("S1", "colors");
    index.subscribe_source("S1", "colors");
    index.subscribe_key("S1", "colors", "primary");
    index.subscribe_key("S1", "colors", "primary");

    // Subscribed to both the source and one of its keys: one notification.
    assert_eq!(index.subscribers("colors", "primary"), vec!["S1".to_string()]);
}

#[test]
fn union_is_deduplicated_across_indices() {
    let index = SubscriptionIndex::new();
    index.subscribe_source("S1", "colors");
    index.subscribe_key("S1", "colors", "primary");
    index.subscribe_key("S2", "colors", "primary");

    let mut subscribers = index.subscribers("colors", "primary");
    subscribers.sort();
    assert_eq!(subscribers, vec!["S1".to_string(), "S2".to_string()]);
}

#[test]
fn unsubscribe_is_idempotent_and_tolerates_absent_entries() {
    let index = SubscriptionIndex::new();
    index.subscribe_source("S1", "colors");

    index.unsubscribe_source("S1", "colors");
    index.unsubscribe_source("S1", "colors");
    index.unsubscribe_source("S9", "ghost");
    index.unsubscribe_key("S9", "ghost", "none");

    assert!(index.subscribers("colors", "primary").is_empty());
}

#[test]
fn unsubscribe_key_keeps_source_subscription() {
    let index = SubscriptionIndex::new();
    index.subscribe_source("S1", "colors");
    index.subscribe_key("S1", "colors", "primary");

    index.unsubscribe_key("S1", "colors", "primary");
    assert_eq!(index.subscribers("colors", "primary"), vec!["S1".to_string()]);

    index.unsubscribe_source("S1", "colors");
    assert!(index.subscribers("colors", "primary").is_empty());
}

#[test]
fn remove_session_clears_both_indices() {
    let index = SubscriptionIndex::new();
    index.subscribe_source("S1", "colors");
    index.subscribe_source("S2", "colors");
    index.subscribe_key("S1", "shapes", "round");
    index.subscribe_key("S1", "colors", "primary");

    index.remove_session("S1");

    assert_eq!(index.subscribers("colors", "primary"), vec!["S2".to_string()]);
    assert!(index.subscribers("shapes", "round").is_empty());
}
