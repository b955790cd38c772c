//! Centralized schema definitions for the Chora database.
//!
//! One SQLite file holds the whole graph: the event log, the live entity
//! and bond relations, the archive, embeddings, the FTS5 surface, protocol
//! states, and the pulse bookkeeping tables.

pub const DB_NAME: &str = "chora.db";

/// Append-only event log. Every mutating store operation writes one row
/// inside the same transaction as the mutation.
pub const SCHEMA_EVENTS: &str = "
    CREATE TABLE IF NOT EXISTS events (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id TEXT NOT NULL,
        ts TEXT NOT NULL,
        kind TEXT NOT NULL,
        op TEXT NOT NULL,
        entity_id TEXT,
        payload TEXT NOT NULL DEFAULT '{}'
    )
";

pub const SCHEMA_ENTITIES: &str = "
    CREATE TABLE IF NOT EXISTS entities (
        id TEXT PRIMARY KEY,
        type TEXT NOT NULL,
        data TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";
pub const INDEX_ENTITIES_TYPE: &str =
    "CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(type)";
pub const INDEX_ENTITIES_STATUS: &str =
    "CREATE INDEX IF NOT EXISTS idx_entities_status ON entities(status)";
pub const INDEX_ENTITIES_UPDATED: &str =
    "CREATE INDEX IF NOT EXISTS idx_entities_updated ON entities(updated_at)";

pub const SCHEMA_BONDS: &str = "
    CREATE TABLE IF NOT EXISTS bonds (
        id TEXT PRIMARY KEY,
        verb TEXT NOT NULL,
        from_id TEXT NOT NULL,
        to_id TEXT NOT NULL,
        confidence REAL NOT NULL DEFAULT 1.0,
        status TEXT NOT NULL DEFAULT 'active',
        metadata TEXT NOT NULL DEFAULT '{}',
        FOREIGN KEY(from_id) REFERENCES entities(id),
        FOREIGN KEY(to_id) REFERENCES entities(id)
    )
";
pub const INDEX_BONDS_FROM: &str = "CREATE INDEX IF NOT EXISTS idx_bonds_from ON bonds(from_id)";
pub const INDEX_BONDS_TO: &str = "CREATE INDEX IF NOT EXISTS idx_bonds_to ON bonds(to_id)";
pub const INDEX_BONDS_VERB: &str = "CREATE INDEX IF NOT EXISTS idx_bonds_verb ON bonds(verb)";

/// Never delete, always archive. `kind` distinguishes entity and bond rows;
/// `payload` holds the full prior record for resurrection.
pub const SCHEMA_ARCHIVE: &str = "
    CREATE TABLE IF NOT EXISTS archive (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        original_id TEXT NOT NULL,
        original_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        archived_at TEXT NOT NULL,
        archived_by TEXT,
        reason TEXT
    )
";
pub const INDEX_ARCHIVE_ORIGINAL: &str =
    "CREATE INDEX IF NOT EXISTS idx_archive_original ON archive(original_id)";

/// One canonical embedding per entity; invalidated whenever the entity's
/// data changes. CASCADE keeps embeddings from outliving their entity.
pub const SCHEMA_EMBEDDINGS: &str = "
    CREATE TABLE IF NOT EXISTS embeddings (
        entity_id TEXT PRIMARY KEY,
        model_name TEXT NOT NULL,
        vector BLOB NOT NULL,
        dimension INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(entity_id) REFERENCES entities(id) ON DELETE CASCADE
    )
";

/// FTS5 surface over entity titles and salient body text.
pub const SCHEMA_FTS: &str = "
    CREATE VIRTUAL TABLE IF NOT EXISTS fts_entities
    USING fts5(id, type, title, body)
";

/// Persisted protocol VM states.
pub const SCHEMA_STATES: &str = "
    CREATE TABLE IF NOT EXISTS states (
        id TEXT PRIMARY KEY,
        protocol_id TEXT NOT NULL,
        status TEXT NOT NULL,
        data TEXT NOT NULL
    )
";

/// One row per signal-triggered protocol execution.
pub const SCHEMA_SIGNAL_OUTCOMES: &str = "
    CREATE TABLE IF NOT EXISTS signal_outcomes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        signal_id TEXT NOT NULL,
        protocol_id TEXT NOT NULL,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        status TEXT NOT NULL,
        duration_ms INTEGER NOT NULL DEFAULT 0,
        error TEXT
    )
";
pub const INDEX_SIGNAL_OUTCOMES_SIGNAL: &str =
    "CREATE INDEX IF NOT EXISTS idx_signal_outcomes_signal ON signal_outcomes(signal_id)";

/// Pulse summaries, retained as a ring of the most recent runs.
pub const SCHEMA_PULSE_HISTORY: &str = "
    CREATE TABLE IF NOT EXISTS pulse_history (
        ts TEXT PRIMARY KEY,
        signals_processed INTEGER NOT NULL DEFAULT 0,
        errors INTEGER NOT NULL DEFAULT 0,
        duration_ms INTEGER NOT NULL DEFAULT 0
    )
";
