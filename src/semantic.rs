//! Semantic layer: embedding persistence, cosine ranking, bond
//! suggestion, and clustering.
//!
//! The vectorizer is a pluggable collaborator; every capability here has a
//! deterministic fallback path when it is absent and reports which path ran
//! via a `method` field. Semantic features enhance but never gate core
//! functionality.

use serde_json::{json, Value};
use std::collections::BTreeSet;

use crate::core::error::ChoraError;
use crate::core::model::{JsonMap, QueryFilter};
use crate::core::physics;
use crate::core::store::Store;

/// Pluggable embedding provider. Implementations live outside the core;
/// tests inject deterministic ones.
pub trait Vectorizer: Send + Sync {
    fn model_name(&self) -> &str;
    fn embed(&self, text: &str) -> Result<Vec<f32>, ChoraError>;
}

// ===== Vector packing =====

/// Serialize a vector as little-endian f32 bytes.
pub fn pack_vector(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn unpack_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Scale to unit length. Zero vectors stay zero.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine of two stored unit vectors: the clamped dot product.
pub fn cosine_bytes(a: &[u8], b: &[u8]) -> f64 {
    let va = unpack_vector(a);
    let vb = unpack_vector(b);
    if va.len() != vb.len() || va.is_empty() {
        return 0.0;
    }
    let dot: f32 = va.iter().zip(vb.iter()).map(|(x, y)| x * y).sum();
    (dot as f64).clamp(0.0, 1.0)
}

/// Extract the text worth embedding from an entity, per type.
pub fn entity_to_semantic_text(entity_type: &str, data: &JsonMap) -> String {
    let mut parts: Vec<String> = Vec::new();
    let push = |parts: &mut Vec<String>, v: Option<&Value>| {
        if let Some(Value::String(s)) = v {
            if !s.is_empty() {
                parts.push(s.clone());
            }
        }
    };

    push(&mut parts, data.get("title"));
    match entity_type {
        "learning" => push(&mut parts, data.get("insight")),
        "principle" => push(&mut parts, data.get("statement")),
        "pattern" => {
            push(&mut parts, data.get("description"));
            push(&mut parts, data.get("template"));
        }
        "behavior" => {
            for field in ["given", "when", "then"] {
                push(&mut parts, data.get(field));
            }
        }
        "inquiry" => push(&mut parts, data.get("question")),
        _ => push(&mut parts, data.get("description")),
    }
    parts.join(" ")
}

// ===== Operations =====

/// Embed one entity and persist the vector. Absent vectorizer → fallback
/// envelope, never an error.
pub fn embed_entity(
    store: &Store,
    vectorizer: Option<&dyn Vectorizer>,
    entity_id: &str,
) -> Result<Value, ChoraError> {
    let entity = store.require_entity(entity_id)?;
    let Some(vectorizer) = vectorizer else {
        return Ok(json!({
            "method": "fallback",
            "entity_id": entity_id,
            "error": "vectorizer unavailable",
        }));
    };
    let text = entity_to_semantic_text(&entity.entity_type, &entity.data);
    let mut vector = vectorizer.embed(&text)?;
    normalize(&mut vector);
    store.save_embedding(
        entity_id,
        vectorizer.model_name(),
        &pack_vector(&vector),
        vector.len(),
    )?;
    Ok(json!({
        "method": "semantic",
        "entity_id": entity_id,
        "dim": vector.len(),
    }))
}

/// Embed free text in memory (nothing persisted).
pub fn embed_text(vectorizer: Option<&dyn Vectorizer>, text: &str) -> Result<Value, ChoraError> {
    let Some(vectorizer) = vectorizer else {
        return Ok(json!({ "method": "fallback", "error": "vectorizer unavailable" }));
    };
    let mut vector = vectorizer.embed(text)?;
    normalize(&mut vector);
    Ok(json!({ "method": "semantic", "dim": vector.len(), "vector": vector }))
}

/// Cosine similarity of two entities' stored vectors.
///
/// Identical ids are 1.0 by definition; a missing vector yields 0.0 with
/// `method: "fallback"`.
pub fn semantic_similarity(store: &Store, a: &str, b: &str) -> Result<Value, ChoraError> {
    if a == b {
        return Ok(json!({ "similarity": 1.0, "method": "semantic" }));
    }
    let (Some((_, va, da)), Some((_, vb, db))) = (store.get_embedding(a)?, store.get_embedding(b)?)
    else {
        return Ok(json!({ "similarity": 0.0, "method": "fallback" }));
    };
    if da != db {
        return Ok(json!({ "similarity": 0.0, "method": "fallback" }));
    }
    Ok(json!({ "similarity": cosine_bytes(&va, &vb), "method": "semantic" }))
}

/// Ranked entity search: cosine over stored embeddings when a vectorizer
/// is present and embeddings exist, FTS5 otherwise.
pub fn semantic_search(
    store: &Store,
    vectorizer: Option<&dyn Vectorizer>,
    query: &str,
    entity_type: Option<&str>,
    limit: u32,
) -> Result<Value, ChoraError> {
    if let Some(vectorizer) = vectorizer {
        let embeddings = store.all_embeddings()?;
        if !embeddings.is_empty() {
            let mut query_vec = vectorizer.embed(query)?;
            normalize(&mut query_vec);
            let query_bytes = pack_vector(&query_vec);

            let mut results = Vec::new();
            for (entity_id, vector, dimension) in embeddings {
                if dimension != query_vec.len() {
                    continue;
                }
                let Some(entity) = store.get_entity(&entity_id)? else {
                    continue;
                };
                if let Some(ty) = entity_type {
                    if entity.entity_type != ty {
                        continue;
                    }
                }
                results.push(json!({
                    "id": entity.id,
                    "type": entity.entity_type,
                    "title": entity.title(),
                    "similarity": cosine_bytes(&query_bytes, &vector),
                }));
            }
            results.sort_by(|x, y| {
                let sx = x["similarity"].as_f64().unwrap_or(0.0);
                let sy = y["similarity"].as_f64().unwrap_or(0.0);
                sy.partial_cmp(&sx).unwrap_or(std::cmp::Ordering::Equal)
            });
            results.truncate(limit as usize);
            return Ok(json!({ "results": results, "method": "semantic" }));
        }
    }

    let rows: Vec<Value> = store
        .fts_search(query, entity_type, limit)?
        .into_iter()
        .map(|(id, ty, snippet)| json!({ "id": id, "type": ty, "snippet": snippet }))
        .collect();
    Ok(json!({ "results": rows, "method": "fts5" }))
}

/// Suggest candidate bonds for an entity, constrained by physics.
///
/// Ranked by cosine when both sides carry embeddings; otherwise a pure
/// type-compatibility listing (`method: "type-based"`).
pub fn suggest_bonds(store: &Store, entity_id: &str, limit: u32) -> Result<Value, ChoraError> {
    let entity = store.require_entity(entity_id)?;
    let attractors = physics::attractors_for(&entity.entity_type);
    if attractors.is_empty() {
        return Ok(json!({ "candidates": [], "method": "type-based" }));
    }

    let source_embedding = store.get_embedding(entity_id)?;
    let mut candidates = Vec::new();
    let mut semantic = false;

    for (verb, target_type) in &attractors {
        let filter = QueryFilter {
            entity_type: Some(target_type.to_string()),
            limit: Some(limit * 4),
            ..Default::default()
        };
        for target in store.query_entities(&filter)? {
            if target.id == entity_id {
                continue;
            }
            let mut candidate = json!({
                "verb": verb,
                "to_id": target.id,
                "to_type": target.entity_type,
                "title": target.title(),
            });
            if let Some((_, source_vec, source_dim)) = &source_embedding {
                if let Some((_, target_vec, target_dim)) = store.get_embedding(&target.id)? {
                    if source_dim == &target_dim {
                        semantic = true;
                        candidate["similarity"] = json!(cosine_bytes(source_vec, &target_vec));
                    }
                }
            }
            candidates.push(candidate);
        }
    }

    if semantic {
        candidates.sort_by(|x, y| {
            let sx = x["similarity"].as_f64().unwrap_or(0.0);
            let sy = y["similarity"].as_f64().unwrap_or(0.0);
            sy.partial_cmp(&sx).unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    candidates.truncate(limit as usize);
    Ok(json!({
        "candidates": candidates,
        "method": if semantic { "semantic" } else { "type-based" },
    }))
}

/// Group same-typed entities into clusters.
///
/// Greedy centroid clustering over embeddings when available, keyword
/// overlap (Jaccard ≥ 0.3) otherwise.
pub fn detect_clusters(
    store: &Store,
    entity_type: &str,
    threshold: f64,
    limit: u32,
) -> Result<Value, ChoraError> {
    let filter = QueryFilter {
        entity_type: Some(entity_type.to_string()),
        limit: Some(limit),
        ..Default::default()
    };
    let entities = store.query_entities(&filter)?;

    // Collect embeddings; two or more means the semantic path is viable.
    let mut embedded: Vec<(String, Vec<u8>)> = Vec::new();
    for entity in &entities {
        if let Some((_, vector, _)) = store.get_embedding(&entity.id)? {
            embedded.push((entity.id.clone(), vector));
        }
    }

    if embedded.len() >= 2 {
        let mut remaining: Vec<(String, Vec<u8>)> = embedded;
        let mut clusters = Vec::new();
        while let Some((centroid_id, centroid_vec)) = remaining.pop() {
            let mut members = vec![centroid_id.clone()];
            remaining.retain(|(id, vector)| {
                if cosine_bytes(&centroid_vec, vector) >= threshold {
                    members.push(id.clone());
                    false
                } else {
                    true
                }
            });
            clusters.push(json!({ "entities": members, "centroid": centroid_id }));
        }
        return Ok(json!({ "clusters": clusters, "method": "semantic" }));
    }

    // Keyword fallback: bag-of-words Jaccard.
    let keywords: Vec<(String, BTreeSet<String>)> = entities
        .iter()
        .map(|e| {
            let text = entity_to_semantic_text(&e.entity_type, &e.data).to_lowercase();
            let words: BTreeSet<String> = text
                .split_whitespace()
                .filter(|w| w.len() > 3)
                .map(str::to_string)
                .collect();
            (e.id.clone(), words)
        })
        .collect();

    let mut remaining = keywords;
    let mut clusters = Vec::new();
    while let Some((centroid_id, centroid_words)) = remaining.pop() {
        let mut members = vec![centroid_id.clone()];
        remaining.retain(|(id, words)| {
            let overlap = centroid_words.intersection(words).count();
            let total = centroid_words.union(words).count();
            if total > 0 && (overlap as f64) / (total as f64) >= 0.3 {
                members.push(id.clone());
                false
            } else {
                true
            }
        });
        clusters.push(json!({ "entities": members, "centroid": centroid_id }));
    }
    Ok(json!({ "clusters": clusters, "method": "keyword" }))
}
