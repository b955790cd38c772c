//! Builtin primitives, grouped by domain.
//!
//! Every handler produces the standard response envelope and routes any
//! user-visible text through the context sink. Adding a primitive: write
//! the handler in its domain module, append one record to `BUILTINS`.

pub mod attention;
pub mod build;
pub mod chronos;
pub mod cognition;
pub mod graph;
pub mod io;
pub mod logic;
pub mod sys;

use serde_json::Value;

use crate::core::error::ChoraError;
use crate::core::model::JsonMap;
use crate::core::registry::PrimitiveRecord;

/// The complete builtin registry. Registration order is irrelevant.
pub const BUILTINS: &[PrimitiveRecord] = &[
    // graph
    PrimitiveRecord {
        id: "primitive-manifest-entity",
        domain: "graph",
        description: "Manifest an entity into the store",
        required: &["type", "id"],
        optional: &["data", "status"],
        handler: graph::manifest_entity,
    },
    PrimitiveRecord {
        id: "primitive-manifest-entities",
        domain: "graph",
        description: "Manifest a batch of entities",
        required: &["entities"],
        optional: &[],
        handler: graph::manifest_entities,
    },
    PrimitiveRecord {
        id: "primitive-manage-bond",
        domain: "graph",
        description: "Create or update a typed bond between entities",
        required: &["verb", "from", "to"],
        optional: &["confidence", "metadata"],
        handler: graph::manage_bond,
    },
    PrimitiveRecord {
        id: "primitive-update-bond-confidence",
        domain: "graph",
        description: "Update the confidence of an existing bond",
        required: &["bond_id", "confidence"],
        optional: &[],
        handler: graph::update_bond_confidence,
    },
    PrimitiveRecord {
        id: "primitive-entity-get",
        domain: "graph",
        description: "Fetch an entity by id",
        required: &["id"],
        optional: &[],
        handler: graph::entity_get,
    },
    PrimitiveRecord {
        id: "primitive-entity-update",
        domain: "graph",
        description: "Merge a patch into an entity's data",
        required: &["id", "patch"],
        optional: &[],
        handler: graph::entity_update,
    },
    PrimitiveRecord {
        id: "primitive-entities-query",
        domain: "graph",
        description: "Query entities by type, status, and data fields",
        required: &[],
        optional: &["type", "status", "since", "limit"],
        handler: graph::entities_query,
    },
    PrimitiveRecord {
        id: "primitive-constellation-get",
        domain: "graph",
        description: "The 1-hop bond neighborhood around an entity",
        required: &["id"],
        optional: &[],
        handler: graph::constellation_get,
    },
    PrimitiveRecord {
        id: "primitive-compost",
        domain: "graph",
        description: "Archive an entity, digesting its bonds into a learning",
        required: &["id"],
        optional: &["force"],
        handler: graph::compost,
    },
    PrimitiveRecord {
        id: "primitive-resurrect",
        domain: "graph",
        description: "Restore an archived entity",
        required: &["archive_id"],
        optional: &[],
        handler: graph::resurrect,
    },
    // attention
    PrimitiveRecord {
        id: "primitive-emit-signal",
        domain: "attention",
        description: "Emit a signal entity demanding attention",
        required: &["title"],
        optional: &["source_id", "signal_type", "urgency", "description", "data"],
        handler: attention::emit_signal,
    },
    PrimitiveRecord {
        id: "primitive-signal-resolve",
        domain: "attention",
        description: "Explicitly resolve an active signal",
        required: &["signal_id"],
        optional: &["resolution"],
        handler: attention::signal_resolve,
    },
    PrimitiveRecord {
        id: "primitive-focus-create",
        domain: "attention",
        description: "Open a focus, optionally triggered by a signal",
        required: &["title"],
        optional: &["signal_id", "data"],
        handler: attention::focus_create,
    },
    PrimitiveRecord {
        id: "primitive-focus-resolve",
        domain: "attention",
        description: "Resolve a focus as completed or abandoned",
        required: &["focus_id", "outcome"],
        optional: &["learning"],
        handler: attention::focus_resolve,
    },
    PrimitiveRecord {
        id: "primitive-focus-list-active",
        domain: "attention",
        description: "List active focuses",
        required: &[],
        optional: &["limit"],
        handler: attention::focus_list_active,
    },
    PrimitiveRecord {
        id: "primitive-detect-stagnation",
        domain: "attention",
        description: "Scan for stagnant entities and emit escalation signals",
        required: &[],
        optional: &[],
        handler: attention::detect_stagnation,
    },
    // io
    PrimitiveRecord {
        id: "primitive-fts-index-entity",
        domain: "io",
        description: "Reindex one entity into the full-text surface",
        required: &["id"],
        optional: &[],
        handler: io::fts_index_entity,
    },
    PrimitiveRecord {
        id: "primitive-fts-search",
        domain: "io",
        description: "Full-text search over entity titles and bodies",
        required: &["query"],
        optional: &["type", "limit"],
        handler: io::fts_search,
    },
    PrimitiveRecord {
        id: "primitive-render",
        domain: "io",
        description: "Emit text through the output membrane",
        required: &["text"],
        optional: &[],
        handler: io::render,
    },
    // logic
    PrimitiveRecord {
        id: "primitive-identity",
        domain: "logic",
        description: "Return the input value unchanged",
        required: &["value"],
        optional: &[],
        handler: logic::identity,
    },
    PrimitiveRecord {
        id: "primitive-json-get",
        domain: "logic",
        description: "Extract a dot-path from a JSON value",
        required: &["value", "path"],
        optional: &[],
        handler: logic::json_get,
    },
    PrimitiveRecord {
        id: "primitive-list-length",
        domain: "logic",
        description: "Length of a list",
        required: &["items"],
        optional: &[],
        handler: logic::list_length,
    },
    PrimitiveRecord {
        id: "primitive-list-slice",
        domain: "logic",
        description: "Slice a list by start/end",
        required: &["items"],
        optional: &["start", "end"],
        handler: logic::list_slice,
    },
    PrimitiveRecord {
        id: "primitive-string-format",
        domain: "logic",
        description: "Render a template against provided values",
        required: &["template"],
        optional: &["values"],
        handler: logic::string_format,
    },
    // chronos
    PrimitiveRecord {
        id: "primitive-timestamp-now",
        domain: "chronos",
        description: "Current UTC timestamp",
        required: &[],
        optional: &[],
        handler: chronos::timestamp_now,
    },
    PrimitiveRecord {
        id: "primitive-timestamp-offset",
        domain: "chronos",
        description: "UTC timestamp offset by days/hours",
        required: &[],
        optional: &["days", "hours"],
        handler: chronos::timestamp_offset,
    },
    // cognition
    PrimitiveRecord {
        id: "primitive-embed-entity",
        domain: "cognition",
        description: "Embed an entity and persist its vector",
        required: &["id"],
        optional: &[],
        handler: cognition::embed_entity,
    },
    PrimitiveRecord {
        id: "primitive-embed-text",
        domain: "cognition",
        description: "Embed free text in memory",
        required: &["text"],
        optional: &[],
        handler: cognition::embed_text,
    },
    PrimitiveRecord {
        id: "primitive-semantic-similarity",
        domain: "cognition",
        description: "Cosine similarity of two entities' stored vectors",
        required: &["a", "b"],
        optional: &[],
        handler: cognition::semantic_similarity,
    },
    PrimitiveRecord {
        id: "primitive-semantic-search",
        domain: "cognition",
        description: "Ranked search: semantic when possible, FTS5 fallback",
        required: &["query"],
        optional: &["type", "limit"],
        handler: cognition::semantic_search,
    },
    PrimitiveRecord {
        id: "primitive-suggest-bonds",
        domain: "cognition",
        description: "Physics-constrained bond candidates for an entity",
        required: &["id"],
        optional: &["limit"],
        handler: cognition::suggest_bonds,
    },
    PrimitiveRecord {
        id: "primitive-detect-clusters",
        domain: "cognition",
        description: "Cluster same-typed entities",
        required: &["type"],
        optional: &["threshold", "limit"],
        handler: cognition::detect_clusters,
    },
    // sys
    PrimitiveRecord {
        id: "primitive-sys-log",
        domain: "sys",
        description: "Log a line through the output membrane",
        required: &["message"],
        optional: &["level"],
        handler: sys::sys_log,
    },
    PrimitiveRecord {
        id: "primitive-sqlite-query",
        domain: "sys",
        description: "Read-only SQL against the store",
        required: &["sql"],
        optional: &[],
        handler: sys::sqlite_query,
    },
    // build
    PrimitiveRecord {
        id: "primitive-integrity-check",
        domain: "build",
        description: "Coverage of behaviors by verifies bonds",
        required: &[],
        optional: &[],
        handler: build::integrity_check,
    },
];

// ===== Argument helpers =====

pub(crate) fn need_str<'a>(inputs: &'a JsonMap, key: &str) -> Result<&'a str, ChoraError> {
    inputs
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ChoraError::InvalidData(format!("missing or non-string input '{}'", key)))
}

pub(crate) fn opt_str<'a>(inputs: &'a JsonMap, key: &str) -> Option<&'a str> {
    inputs.get(key).and_then(Value::as_str)
}

pub(crate) fn opt_map(inputs: &JsonMap, key: &str) -> JsonMap {
    inputs
        .get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

pub(crate) fn opt_u32(inputs: &JsonMap, key: &str, default: u32) -> u32 {
    inputs
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(default)
}

pub(crate) fn opt_f64(inputs: &JsonMap, key: &str) -> Option<f64> {
    inputs.get(key).and_then(Value::as_f64)
}

pub(crate) fn opt_bool(inputs: &JsonMap, key: &str, default: bool) -> bool {
    inputs.get(key).and_then(Value::as_bool).unwrap_or(default)
}
