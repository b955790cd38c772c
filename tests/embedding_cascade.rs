//! Embedding lifecycle: vectors never outlive the data they describe,
//! and every semantic capability degrades deterministically without a
//! vectorizer.

use chora::core::error::ChoraError;
use chora::core::store::Store;
use chora::semantic::{self, Vectorizer};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

/// Deterministic toy vectorizer: characters bucketed into 8 dimensions.
struct ToyVectorizer;

impl Vectorizer for ToyVectorizer {
    fn model_name(&self) -> &str {
        "toy-buckets-8"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, ChoraError> {
        let mut v = vec![0.0f32; 8];
        for byte in text.bytes() {
            v[(byte as usize) % 8] += 1.0;
        }
        Ok(v)
    }
}

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
fn data_update_invalidates_the_embedding() {
    let (_tmp, store) = open_store();
    manifest(&store, "learning", "learning-e", "original insight");

    let result = semantic::embed_entity(&store, Some(&ToyVectorizer), "learning-e").unwrap();
    assert_eq!(result["method"], json!("semantic"));
    assert!(store.has_embedding("learning-e").unwrap());

    // Update the data: the stale vector must be gone after the commit.
    let mut data = serde_json::Map::new();
    data.insert("title".into(), json!("revised insight"));
    store
        .save_entity("learning-e", "learning", data, None)
        .expect("update");
    assert!(!store.has_embedding("learning-e").unwrap());
}

#[test]
fn archive_cascades_the_embedding_and_keeps_the_payload() {
    let (_tmp, store) = open_store();
    manifest(&store, "learning", "learning-gone", "to be archived");
    semantic::embed_entity(&store, Some(&ToyVectorizer), "learning-gone").unwrap();
    // Re-embed after the hook-driven reindex; the row must exist now.
    assert!(store.has_embedding("learning-gone").unwrap());

    let record = store
        .archive_entity("learning-gone", "test", None, false)
        .expect("archive");
    assert_eq!(record.kind, "entity");
    assert_eq!(record.payload["data"]["title"], json!("to be archived"));

    assert!(store.get_entity("learning-gone").unwrap().is_none());
    assert!(!store.has_embedding("learning-gone").unwrap());
    let archived = store.archived_records(Some("learning-gone")).unwrap();
    assert_eq!(archived.len(), 1);
}

#[test]
fn identical_entities_are_perfectly_similar() {
    let (_tmp, store) = open_store();
    manifest(&store, "learning", "learning-a", "alpha");
    let result = semantic::semantic_similarity(&store, "learning-a", "learning-a").unwrap();
    assert_eq!(result["similarity"], json!(1.0));
}

#[test]
fn missing_vectors_fall_back_to_zero() {
    let (_tmp, store) = open_store();
    manifest(&store, "learning", "learning-a", "alpha");
    manifest(&store, "learning", "learning-b", "beta");
    let result = semantic::semantic_similarity(&store, "learning-a", "learning-b").unwrap();
    assert_eq!(result["similarity"], json!(0.0));
    assert_eq!(result["method"], json!("fallback"));
}

#[test]
fn embed_without_vectorizer_reports_fallback() {
    let (_tmp, store) = open_store();
    manifest(&store, "learning", "learning-a", "alpha");
    let result = semantic::embed_entity(&store, None, "learning-a").unwrap();
    assert_eq!(result["method"], json!("fallback"));
    assert!(!store.has_embedding("learning-a").unwrap());
}

#[test]
fn search_ranks_semantically_when_vectors_exist() {
    let (_tmp, store) = open_store();
    manifest(&store, "learning", "learning-fts", "sqlite write ahead logging");
    manifest(&store, "learning", "learning-other", "gardening in spring");
    for id in ["learning-fts", "learning-other"] {
        semantic::embed_entity(&store, Some(&ToyVectorizer), id).unwrap();
    }

    let result = semantic::semantic_search(
        &store,
        Some(&ToyVectorizer),
        "sqlite write ahead logging",
        None,
        5,
    )
    .unwrap();
    assert_eq!(result["method"], json!("semantic"));
    let results = result["results"].as_array().unwrap();
    assert_eq!(results[0]["id"], json!("learning-fts"));
    assert!(
        results[0]["similarity"].as_f64().unwrap()
            >= results[1]["similarity"].as_f64().unwrap()
    );
}

#[test]
fn search_without_vectorizer_uses_fts() {
    let (_tmp, store) = open_store();
    manifest(&store, "learning", "learning-fts", "write ahead logging");

    let result = semantic::semantic_search(&store, None, "logging", None, 5).unwrap();
    assert_eq!(result["method"], json!("fts5"));
    if store.fts_available() {
        let results = result["results"].as_array().unwrap();
        assert_eq!(results[0]["id"], json!("learning-fts"));
    }
}

#[test]
fn bond_suggestions_respect_physics_without_vectors() {
    let (_tmp, store) = open_store();
    manifest(&store, "learning", "learning-src", "the source");
    manifest(&store, "principle", "principle-t1", "a principle");
    manifest(&store, "pattern", "pattern-t2", "a pattern");
    manifest(&store, "tool", "tool-t3", "a tool");

    let result = semantic::suggest_bonds(&store, "learning-src", 10).unwrap();
    assert_eq!(result["method"], json!("type-based"));
    let candidates = result["candidates"].as_array().unwrap();
    assert!(!candidates.is_empty());
    for candidate in candidates {
        let verb = candidate["verb"].as_str().unwrap();
        let to_type = candidate["to_type"].as_str().unwrap();
        // learning only surfaces principles and induces patterns.
        assert!(
            (verb == "surfaces" && to_type == "principle")
                || (verb == "induces" && to_type == "pattern"),
            "unexpected candidate {} -> {}",
            verb,
            to_type
        );
    }
}

#[test]
fn clustering_falls_back_to_keywords() {
    let (_tmp, store) = open_store();
    manifest(&store, "learning", "learning-k1", "database indexing strategies overview");
    manifest(&store, "learning", "learning-k2", "database indexing strategies deepdive");
    manifest(&store, "learning", "learning-k3", "sourdough fermentation timing");

    let result = semantic::detect_clusters(&store, "learning", 0.8, 100).unwrap();
    assert_eq!(result["method"], json!("keyword"));
    let clusters = result["clusters"].as_array().unwrap();
    assert!(clusters.len() >= 2, "related learnings group, unrelated split");
}
