//! Archive lifecycle: never delete, always archive. Composting refuses on
//! live bonds, digests the event into a learning, and resurrection
//! restores the original payload.

use chora::core::store::Store;
use chora::metabolism;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn open_store() -> (TempDir, Arc<Store>) {
    let tmp = TempDir::new().expect("tempdir");
    let store = Store::open(tmp.path().join("chora.db")).expect("open store");
    (tmp, store)
}

fn manifest(store: &Store, entity_type: &str, id: &str, title: &str) {
    let mut data = serde_json::Map::new();
    data.insert("title".into(), json!(title));
    store.save_entity(id, entity_type, data, None).expect("save");
}

#[test]
fn archive_refuses_live_bonds_without_force() {
    let (_tmp, store) = open_store();
    manifest(&store, "tool", "tool-t", "T");
    manifest(&store, "behavior", "behavior-b", "B");
    store
        .manage_bond("verifies", "tool-t", "behavior-b", None, None)
        .expect("bond");

    let err = store
        .archive_entity("tool-t", "cleanup", None, false)
        .expect_err("live bond blocks archive");
    assert_eq!(err.kind().as_str(), "invalid_inputs");
    assert!(store.get_entity("tool-t").unwrap().is_some());

    // Force archives the bonds first, then the entity.
    store
        .archive_entity("tool-t", "cleanup", None, true)
        .expect("forced archive");
    assert!(store.get_entity("tool-t").unwrap().is_none());
    assert!(store.bonds_to("behavior-b").unwrap().is_empty());
}

#[test]
fn compost_emits_a_learning_about_the_decomposition() {
    let (_tmp, store) = open_store();
    manifest(&store, "inquiry", "inquiry-dead", "Dead end");

    let result = metabolism::compost(&store, "inquiry-dead", false).expect("compost");
    assert_eq!(result["archived"], json!(true));

    let learning_id = result["learning_id"].as_str().unwrap();
    let learning = store.require_entity(learning_id).expect("learning exists");
    assert_eq!(learning.entity_type, "learning");
    assert_eq!(
        learning.data.get("composted_id").and_then(|v| v.as_str()),
        Some("inquiry-dead")
    );
}

#[test]
fn compost_with_live_bonds_requires_force() {
    let (_tmp, store) = open_store();
    manifest(&store, "inquiry", "inquiry-q", "Q");
    manifest(&store, "learning", "learning-l", "L");
    store
        .manage_bond("yields", "inquiry-q", "learning-l", None, None)
        .expect("bond");

    let err = metabolism::compost(&store, "inquiry-q", false).expect_err("refuses");
    assert_eq!(err.kind().as_str(), "invalid_inputs");

    let result = metabolism::compost(&store, "inquiry-q", true).expect("forced compost");
    assert_eq!(result["archived"], json!(true));
    assert_eq!(result["bonds_archived"], json!(1));
}

#[test]
fn resurrection_restores_the_original_payload() {
    let (_tmp, store) = open_store();
    manifest(&store, "story", "story-s", "Once upon a time");
    let record = store
        .archive_entity("story-s", "test", None, false)
        .expect("archive");

    let restored = store.resurrect(&record.id).expect("resurrect");
    assert_eq!(restored.id, "story-s");

    let entity = store.require_entity("story-s").expect("entity is live again");
    assert_eq!(entity.title(), "Once upon a time");
    assert!(store.archived_records(Some("story-s")).unwrap().is_empty());
}

#[test]
fn no_live_references_remain_after_archive() {
    let (_tmp, store) = open_store();
    manifest(&store, "tool", "tool-t", "T");
    manifest(&store, "signal", "signal-s", "S");
    store
        .manage_bond("emits", "tool-t", "signal-s", None, None)
        .expect("bond");

    store
        .archive_entity("signal-s", "test", None, true)
        .expect("archive");
    assert!(store.bonds_from("tool-t").unwrap().is_empty());
    assert!(store.bonds_to("signal-s").unwrap().is_empty());

    // Both the entity and its bond landed in the archive relation.
    let records = store.archived_records(None).unwrap();
    assert!(records.iter().any(|r| r.kind == "entity"));
    assert!(records.iter().any(|r| r.kind == "bond"));
}
