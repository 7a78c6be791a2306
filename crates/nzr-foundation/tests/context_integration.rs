//! Integration tests for `ContextStore`: expiry, capacity and snapshots.
//!
//! The TTL scenario sleeps on the real clock because expiry is measured
//! against wall-clock timestamps.
//!
//! ```bash
//! cargo test -p nzr-foundation --test context_integration
//! ```

mod common;

use std::time::Duration;

use common::{init_tracing, payload};
use nzr_foundation::{ContextStore, ContextUpdate};
use nzr_kernel::config::ContextConfig;
use serde_json::json;

fn store(max_contexts: usize) -> ContextStore {
    init_tracing();
    ContextStore::new(ContextConfig {
        default_ttl: None,
        max_contexts,
        cleanup_interval_secs: 300,
        max_message_history: 100,
    })
}

#[tokio::test]
async fn short_ttl_context_expires_and_rejects_messages() {
    let store = store(100);
    store.create_context("s1", None, Some(1)).unwrap();
    assert!(store.add_message("s1", "user", "hi", None));

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(store.get_context("s1").is_none());
    assert!(!store.add_message("s1", "user", "hi again", None));
    assert!(store.is_empty());
}

#[tokio::test]
async fn contexts_without_ttl_survive() {
    let store = store(100);
    store.create_context("forever", None, None).unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(store.cleanup_expired(), 0);
    assert!(store.get_context("forever").is_some());
}

#[tokio::test]
async fn activity_keeps_a_context_alive() {
    let store = store(100);
    store.create_context("busy", None, Some(1)).unwrap();

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(store.add_message("busy", "user", "still here", None));
    }
    assert_eq!(store.get_context("busy").unwrap().messages.len(), 3);
}

#[tokio::test]
async fn capacity_is_never_exceeded() {
    let store = store(5);
    for i in 0..12 {
        store.create_context(&format!("c{i}"), None, None).unwrap();
        assert!(store.len() <= 5);
        // distinct creation instants keep eviction order deterministic
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let ids: Vec<_> = store
        .list_contexts(false)
        .into_iter()
        .map(|s| s.context_id)
        .collect();
    assert_eq!(ids, vec!["c7", "c8", "c9", "c10", "c11"]);
    assert_eq!(store.stats().contexts_cleaned, 7);
}

#[tokio::test]
async fn background_sweep_collects_expired_contexts() {
    init_tracing();
    let store = ContextStore::new(ContextConfig {
        default_ttl: Some(1),
        max_contexts: 100,
        cleanup_interval_secs: 1,
        max_message_history: 100,
    });
    store.start();
    store.create_context("a", None, None).unwrap();
    store.create_context("b", None, None).unwrap();

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(store.len(), 0);
    assert_eq!(store.stats().contexts_expired, 2);

    tokio::time::timeout(Duration::from_secs(1), store.stop())
        .await
        .expect("stop must not hang");
}

#[tokio::test]
async fn snapshot_moves_between_stores_as_json_text() {
    let source = store(100);
    source
        .create_context("chat", Some(payload(json!({"user": "u-1"}))), Some(600))
        .unwrap();
    source.add_message("chat", "system", "be helpful", None);
    source.add_message(
        "chat",
        "user",
        "hello",
        Some(payload(json!({"client": "web"}))),
    );
    source.update_state("chat", "turns", json!(1));

    let text = serde_json::to_string(&source.export_value("chat").unwrap().unwrap()).unwrap();

    let target = store(100);
    let restored = target
        .import_value(serde_json::from_str(&text).unwrap())
        .unwrap();

    assert_eq!(restored, source.export("chat").unwrap());
    assert_eq!(restored.messages[1].metadata["client"], "web");
    assert_eq!(restored.state["turns"], 1);
}

#[tokio::test]
async fn update_context_can_extend_ttl() {
    let store = store(100);
    store.create_context("c", None, Some(1)).unwrap();
    store
        .update_context("c", ContextUpdate::new().with_ttl(Some(60)))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(store.get_context("c").is_some());
}
