//! Sync routing: `inhabits` bonds plus keyring policy decide which cloud
//! circles receive an entity's changes. Local-only is the default
//! everywhere; the bridge queue preserves per-entity order.

use chora::core::store::Store;
use chora::keyring::{Keyring, SyncPolicy};
use chora::sync_bridge::SyncBridge;
use chora::sync_router::SyncRouter;
use serde_json::json;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tempfile::TempDir;

fn open_store() -> (TempDir, Arc<Store>) {
    let tmp = TempDir::new().expect("tempdir");
    let store = Store::open(tmp.path().join("chora.db")).expect("open store");
    (tmp, store)
}

fn manifest(store: &Store, entity_type: &str, id: &str) {
    let mut data = serde_json::Map::new();
    data.insert("title".into(), json!(id));
    store.save_entity(id, entity_type, data, None).expect("save");
}

fn keyring_with_circles() -> Keyring {
    let mut keyring = Keyring::new("tester");
    keyring.bind("circle-local", SyncPolicy::LocalOnly, None);
    keyring.bind("circle-shared", SyncPolicy::Cloud, None);
    keyring
}

#[test]
fn mixed_inhabitance_targets_only_cloud_circles() {
    let (_tmp, store) = open_store();
    manifest(&store, "circle", "circle-local");
    manifest(&store, "circle", "circle-shared");
    manifest(&store, "learning", "learning-e");
    store
        .manage_bond("inhabits", "learning-e", "circle-local", None, None)
        .expect("bond");
    store
        .manage_bond("inhabits", "learning-e", "circle-shared", None, None)
        .expect("bond");

    let router = SyncRouter::new(Arc::clone(&store), keyring_with_circles());
    assert!(router.should_emit("learning-e").unwrap());
    assert_eq!(
        router.target_circles("learning-e").unwrap(),
        vec!["circle-shared".to_string()]
    );
}

#[test]
fn local_only_inhabitance_emits_nothing() {
    let (_tmp, store) = open_store();
    manifest(&store, "circle", "circle-local");
    manifest(&store, "learning", "learning-quiet");
    store
        .manage_bond("inhabits", "learning-quiet", "circle-local", None, None)
        .expect("bond");

    let router = SyncRouter::new(Arc::clone(&store), keyring_with_circles());
    assert!(!router.should_emit("learning-quiet").unwrap());
    assert!(router.target_circles("learning-quiet").unwrap().is_empty());
}

#[test]
fn unknown_circles_default_to_local_only() {
    let (_tmp, store) = open_store();
    manifest(&store, "circle", "circle-mystery");
    manifest(&store, "learning", "learning-m");
    store
        .manage_bond("inhabits", "learning-m", "circle-mystery", None, None)
        .expect("bond");

    // Empty keyring: no binding for circle-mystery.
    let router = SyncRouter::new(Arc::clone(&store), Keyring::new("tester"));
    assert!(!router.should_emit("learning-m").unwrap());
}

#[test]
fn every_save_queues_one_change_in_order() {
    let (_tmp, store) = open_store();
    manifest(&store, "circle", "circle-shared");
    manifest(&store, "learning", "learning-e");
    store
        .manage_bond("inhabits", "learning-e", "circle-shared", None, None)
        .expect("bond");

    let bridge = SyncBridge::new(Arc::clone(&store), keyring_with_circles());

    for revision in 1..=3 {
        let mut data = serde_json::Map::new();
        data.insert("title".into(), json!(format!("rev {}", revision)));
        store
            .save_entity("learning-e", "learning", data, None)
            .expect("save");
    }

    let changes = bridge.flush();
    assert_eq!(changes.len(), 3, "no latest-write-wins collapsing");
    let revisions: Vec<_> = changes
        .iter()
        .map(|c| c.payload["title"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(revisions, vec!["rev 1", "rev 2", "rev 3"]);
    assert_eq!(changes[0].circle_ids, vec!["circle-shared".to_string()]);

    // flush() cleared the queue.
    assert!(bridge.flush().is_empty());
}

#[test]
fn local_only_saves_never_reach_the_queue() {
    let (_tmp, store) = open_store();
    manifest(&store, "circle", "circle-local");
    manifest(&store, "learning", "learning-quiet");
    store
        .manage_bond("inhabits", "learning-quiet", "circle-local", None, None)
        .expect("bond");

    let bridge = SyncBridge::new(Arc::clone(&store), keyring_with_circles());
    let mut data = serde_json::Map::new();
    data.insert("title".into(), json!("still local"));
    store
        .save_entity("learning-quiet", "learning", data, None)
        .expect("save");

    assert!(bridge.flush().is_empty());
}

#[test]
fn callback_fires_per_change_and_close_unhooks() {
    let (_tmp, store) = open_store();
    manifest(&store, "circle", "circle-shared");
    manifest(&store, "learning", "learning-e");
    store
        .manage_bond("inhabits", "learning-e", "circle-shared", None, None)
        .expect("bond");

    let bridge = SyncBridge::new(Arc::clone(&store), keyring_with_circles());
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_cb = Arc::clone(&fired);
    bridge.set_change_callback(Some(Box::new(move |_change| {
        fired_in_cb.fetch_add(1, Ordering::SeqCst);
    })));

    let mut data = serde_json::Map::new();
    data.insert("title".into(), json!("first"));
    store
        .save_entity("learning-e", "learning", data.clone(), None)
        .expect("save");
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    bridge.close();
    data.insert("title".into(), json!("after close"));
    store
        .save_entity("learning-e", "learning", data, None)
        .expect("save");
    assert_eq!(fired.load(Ordering::SeqCst), 1, "closed bridge observes nothing");
    assert_eq!(bridge.flush().len(), 1);
}
