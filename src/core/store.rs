//! The typed graph store: event-sourced writes over SQLite.
//!
//! Single-writer, multi-reader. All mutations serialize through one writer
//! connection behind a mutex and append a row to the `events` log inside
//! the same transaction. Readers open fresh WAL connections.
//!
//! Save hooks run strictly after the commit, outside the writer critical
//! section, in registration order. Each hook is isolated: a panicking hook
//! is logged to stderr and never rolls back the commit.

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::core::db::db_connect;
use crate::core::error::ChoraError;
use crate::core::model::{
    Bond, Constellation, ConstellationEdge, Entity, EntitySummary, JsonMap, QueryFilter,
    StateEntity,
};
use crate::core::physics;
use crate::core::schemas;
use crate::core::time::{new_event_id, now_iso, short_id};

/// Hook invoked after a successful entity commit.
pub type SaveHookFn = dyn Fn(&Store, &str, &str, &JsonMap) + Send + Sync;

/// Number of pulse summaries retained in `pulse_history`.
pub const PULSE_RING_SIZE: usize = 50;

/// Outcome of a `manage_bond` call.
#[derive(Debug, Clone)]
pub struct BondOutcome {
    pub bond: Bond,
    pub created: bool,
    pub previous_confidence: Option<f64>,
    pub signal_id: Option<String>,
}

/// A row of the archive relation.
#[derive(Debug, Clone)]
pub struct ArchiveRecord {
    pub id: String,
    pub kind: String,
    pub original_id: String,
    pub original_type: String,
    pub payload: Value,
    pub archived_at: String,
}

pub struct Store {
    path: PathBuf,
    writer: Mutex<Connection>,
    hooks: RwLock<Vec<(u64, Arc<SaveHookFn>)>>,
    next_hook_id: AtomicU64,
    fts_available: bool,
}

impl Store {
    /// Open (or create) the store and ensure its schema.
    ///
    /// The FTS indexer is registered as the first save hook; an SQLite
    /// build without FTS5 degrades to no indexing rather than failing.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Store>, ChoraError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = db_connect(&path)?;
        for ddl in [
            schemas::SCHEMA_EVENTS,
            schemas::SCHEMA_ENTITIES,
            schemas::INDEX_ENTITIES_TYPE,
            schemas::INDEX_ENTITIES_STATUS,
            schemas::INDEX_ENTITIES_UPDATED,
            schemas::SCHEMA_BONDS,
            schemas::INDEX_BONDS_FROM,
            schemas::INDEX_BONDS_TO,
            schemas::INDEX_BONDS_VERB,
            schemas::SCHEMA_ARCHIVE,
            schemas::INDEX_ARCHIVE_ORIGINAL,
            schemas::SCHEMA_EMBEDDINGS,
            schemas::SCHEMA_STATES,
            schemas::SCHEMA_SIGNAL_OUTCOMES,
            schemas::INDEX_SIGNAL_OUTCOMES_SIGNAL,
            schemas::SCHEMA_PULSE_HISTORY,
        ] {
            conn.execute_batch(ddl)?;
        }
        let fts_available = conn.execute_batch(schemas::SCHEMA_FTS).is_ok();

        let store = Arc::new(Store {
            path,
            writer: Mutex::new(conn),
            hooks: RwLock::new(Vec::new()),
            next_hook_id: AtomicU64::new(1),
            fts_available,
        });

        store.add_hook(Arc::new(|store: &Store, id: &str, _ty: &str, _data: &JsonMap| {
            let _ = store.fts_index_entity(id);
        }));

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fts_available(&self) -> bool {
        self.fts_available
    }

    /// Fresh read connection (consistent WAL snapshot per statement).
    pub fn read_conn(&self) -> Result<Connection, ChoraError> {
        db_connect(&self.path)
    }

    // ===== Save hooks =====

    /// Register a save hook. Returns an id usable with [`Store::remove_hook`].
    pub fn add_hook(&self, hook: Arc<SaveHookFn>) -> u64 {
        let id = self.next_hook_id.fetch_add(1, Ordering::SeqCst);
        self.hooks
            .write()
            .expect("hook registry poisoned")
            .push((id, hook));
        id
    }

    pub fn remove_hook(&self, hook_id: u64) {
        self.hooks
            .write()
            .expect("hook registry poisoned")
            .retain(|(id, _)| *id != hook_id);
    }

    fn fire_hooks(&self, entity_id: &str, entity_type: &str, data: &JsonMap) {
        let snapshot: Vec<Arc<SaveHookFn>> = {
            let guard = self.hooks.read().expect("hook registry poisoned");
            guard.iter().map(|(_, h)| Arc::clone(h)).collect()
        };
        for hook in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| {
                hook(self, entity_id, entity_type, data)
            }));
            if result.is_err() {
                eprintln!("save hook panicked for entity {} (commit unaffected)", entity_id);
            }
        }
    }

    // ===== Event-sourced write path =====

    fn with_write<F, R>(&self, kind: &str, op: &str, entity_id: Option<&str>, payload: Value, f: F) -> Result<R, ChoraError>
    where
        F: FnOnce(&Transaction) -> Result<R, ChoraError>,
    {
        let mut guard = self.writer.lock().expect("store writer poisoned");
        let tx = guard.transaction()?;
        let result = f(&tx)?;
        tx.execute(
            "INSERT INTO events (event_id, ts, kind, op, entity_id, payload) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new_event_id(),
                now_iso(),
                kind,
                op,
                entity_id,
                payload.to_string()
            ],
        )?;
        tx.commit()?;
        Ok(result)
    }

    // ===== Entities =====

    /// Upsert an entity. Fires save hooks after the commit; cascades
    /// embedding invalidation when `data` changed.
    ///
    /// The envelope columns (`status`, `created_at`, `updated_at`) are
    /// authoritative; timestamp keys are stripped from the stored payload
    /// so reads always mirror the live column values.
    pub fn save_entity(
        &self,
        entity_id: &str,
        entity_type: &str,
        mut data: JsonMap,
        status: Option<&str>,
    ) -> Result<Entity, ChoraError> {
        if entity_id != entity_type && !entity_id.starts_with(&format!("{}-", entity_type)) {
            return Err(ChoraError::InvalidData(format!(
                "id {} does not carry the {} prefix",
                entity_id, entity_type
            )));
        }

        let now = now_iso();
        let existing = self.raw_entity_row(entity_id)?;
        if let Some((prev_type, _, _, _)) = &existing {
            if prev_type != entity_type {
                return Err(ChoraError::DuplicateId(format!(
                    "{} already exists with type {}",
                    entity_id, prev_type
                )));
            }
        }

        let status = status
            .map(str::to_string)
            .or_else(|| {
                data.get("status")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .or_else(|| existing.as_ref().map(|(_, _, s, _)| s.clone()))
            .unwrap_or_else(|| "active".to_string());

        data.remove("created_at");
        data.remove("updated_at");
        data.insert("status".to_string(), Value::String(status.clone()));

        let created_at = existing
            .as_ref()
            .map(|(_, _, _, c)| c.clone())
            .unwrap_or_else(|| now.clone());
        // updated_at is monotonic: never behind created_at.
        let updated_at = if now < created_at { created_at.clone() } else { now };

        let data_json = Value::Object(data.clone()).to_string();
        let data_changed = existing
            .as_ref()
            .map(|(_, prev_data, _, _)| prev_data != &data_json)
            .unwrap_or(true);

        self.with_write(
            "entity",
            if existing.is_some() { "entity.update" } else { "entity.create" },
            Some(entity_id),
            json!({ "type": entity_type, "status": status }),
            |tx| {
                tx.execute(
                    "INSERT INTO entities (id, type, data, status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                         data=excluded.data,
                         status=excluded.status,
                         updated_at=excluded.updated_at",
                    params![entity_id, entity_type, data_json, status, created_at, updated_at],
                )?;
                if data_changed {
                    tx.execute("DELETE FROM embeddings WHERE entity_id = ?1", params![entity_id])?;
                }
                Ok(())
            },
        )?;

        self.fire_hooks(entity_id, entity_type, &data);

        Ok(Entity {
            id: entity_id.to_string(),
            entity_type: entity_type.to_string(),
            data,
            status,
            created_at,
            updated_at,
        })
    }

    /// Raw row (type, data, status, created_at) without envelope mirroring.
    fn raw_entity_row(
        &self,
        entity_id: &str,
    ) -> Result<Option<(String, String, String, String)>, ChoraError> {
        let conn = self.read_conn()?;
        Ok(conn
            .query_row(
                "SELECT type, data, status, created_at FROM entities WHERE id = ?1",
                params![entity_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?)
    }

    pub fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>, ChoraError> {
        let conn = self.read_conn()?;
        let row = conn
            .query_row(
                "SELECT id, type, data, status, created_at, updated_at FROM entities WHERE id = ?1",
                params![entity_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, entity_type, data, status, created_at, updated_at)) = row else {
            return Ok(None);
        };
        let mut data: JsonMap = serde_json::from_str(&data)?;
        // Mirror the envelope columns into data for template consumers.
        data.entry("status".to_string())
            .or_insert_with(|| Value::String(status.clone()));
        data.entry("created_at".to_string())
            .or_insert_with(|| Value::String(created_at.clone()));
        data.entry("updated_at".to_string())
            .or_insert_with(|| Value::String(updated_at.clone()));
        Ok(Some(Entity {
            id,
            entity_type,
            data,
            status,
            created_at,
            updated_at,
        }))
    }

    pub fn require_entity(&self, entity_id: &str) -> Result<Entity, ChoraError> {
        self.get_entity(entity_id)?
            .ok_or_else(|| ChoraError::NotFound(format!("entity {}", entity_id)))
    }

    pub fn query_entities(&self, filter: &QueryFilter) -> Result<Vec<Entity>, ChoraError> {
        let conn = self.read_conn()?;
        let mut sql = String::from(
            "SELECT id, type, data, status, created_at, updated_at FROM entities WHERE 1=1",
        );
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ty) = &filter.entity_type {
            sql.push_str(" AND type = ?");
            params_vec.push(Box::new(ty.clone()));
        }
        if let Some(status) = &filter.status {
            sql.push_str(" AND status = ?");
            params_vec.push(Box::new(status.clone()));
        }
        if let Some(since) = &filter.since {
            sql.push_str(" AND updated_at >= ?");
            params_vec.push(Box::new(since.clone()));
        }
        for (path, value) in &filter.data_eq {
            sql.push_str(" AND json_extract(data, ?) = ?");
            params_vec.push(Box::new(format!("$.{}", path)));
            match value {
                Value::String(s) => params_vec.push(Box::new(s.clone())),
                Value::Number(n) if n.is_i64() => params_vec.push(Box::new(n.as_i64().unwrap())),
                Value::Number(n) => params_vec.push(Box::new(n.as_f64().unwrap_or(0.0))),
                Value::Bool(b) => params_vec.push(Box::new(*b)),
                other => params_vec.push(Box::new(other.to_string())),
            }
        }
        sql.push_str(" ORDER BY updated_at DESC LIMIT ?");
        params_vec.push(Box::new(filter.limit.unwrap_or(100)));

        let mut stmt = conn.prepare(&sql)?;
        let refs: Vec<&dyn rusqlite::types::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(refs.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, entity_type, data, status, created_at, updated_at) = row?;
            out.push(Entity {
                id,
                entity_type,
                data: serde_json::from_str(&data)?,
                status,
                created_at,
                updated_at,
            });
        }
        Ok(out)
    }

    // ===== Signals =====

    /// Emit a signal entity. Returns the new signal id.
    pub fn emit_signal(
        &self,
        title: &str,
        source_id: Option<&str>,
        signal_type: &str,
        urgency: &str,
        category: Option<&str>,
        extra: JsonMap,
    ) -> Result<String, ChoraError> {
        let signal_id = format!("signal-{}-{}", slugify(title), short_id());
        let mut data = JsonMap::new();
        data.insert("title".into(), json!(title));
        data.insert("status".into(), json!("active"));
        data.insert("signal_type".into(), json!(signal_type));
        data.insert("urgency".into(), json!(urgency));
        data.insert("emitted_at".into(), json!(now_iso()));
        if let Some(src) = source_id {
            data.insert("source_id".into(), json!(src));
        }
        if let Some(cat) = category {
            data.insert("category".into(), json!(cat));
        }
        for (k, v) in extra {
            data.insert(k, v);
        }
        self.save_entity(&signal_id, "signal", data, Some("active"))?;
        Ok(signal_id)
    }

    // ===== Bonds =====

    /// Create or update a bond, enforcing physics and confidence semantics.
    ///
    /// - creation with confidence < 1.0 emits a `tentative-bond` signal
    ///   (urgency is always normal at create time)
    /// - a downward confidence update emits `bond-confidence-dropped`
    ///   (urgency high when the drop is >= 0.5)
    /// - upward updates emit nothing
    pub fn manage_bond(
        &self,
        verb: &str,
        from_id: &str,
        to_id: &str,
        confidence: Option<f64>,
        metadata: Option<JsonMap>,
    ) -> Result<BondOutcome, ChoraError> {
        let from = self.require_entity(from_id)?;
        let to = self.require_entity(to_id)?;
        physics::check_bond(verb, &from.entity_type, &to.entity_type)?;

        let confidence = confidence.unwrap_or(1.0).clamp(0.0, 1.0);
        let bond_id = format!("bond-{}-{}-{}", verb, slugify(&from.id), slugify(&to.id));
        let existing = self.get_bond(&bond_id)?;
        let mut metadata = metadata.unwrap_or_default();
        metadata
            .entry("created_at".to_string())
            .or_insert_with(|| json!(now_iso()));
        let metadata_json = Value::Object(metadata.clone()).to_string();

        self.with_write(
            "bond",
            if existing.is_some() { "bond.update" } else { "bond.create" },
            Some(&bond_id),
            json!({ "verb": verb, "from": from.id, "to": to.id, "confidence": confidence }),
            |tx| {
                tx.execute(
                    "INSERT INTO bonds (id, verb, from_id, to_id, confidence, status, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6)
                     ON CONFLICT(id) DO UPDATE SET
                         confidence=excluded.confidence,
                         metadata=excluded.metadata",
                    params![bond_id, verb, from.id, to.id, confidence, metadata_json],
                )?;
                Ok(())
            },
        )?;

        let mut signal_id = None;
        let previous_confidence = existing.as_ref().map(|b| b.confidence);
        match previous_confidence {
            None => {
                if confidence < 1.0 {
                    signal_id = Some(self.emit_signal(
                        &format!("Tentative bond created (confidence={:.2})", confidence),
                        Some(&bond_id),
                        "epistemic",
                        "normal",
                        Some("tentative-bond"),
                        JsonMap::new(),
                    )?);
                }
            }
            Some(previous) if confidence < previous => {
                let drop = previous - confidence;
                let urgency = if drop >= 0.5 { "high" } else { "normal" };
                signal_id = Some(self.emit_signal(
                    &format!("Bond confidence dropped ({:.2} -> {:.2})", previous, confidence),
                    Some(&bond_id),
                    "epistemic",
                    urgency,
                    Some("bond-confidence-dropped"),
                    JsonMap::new(),
                )?);
            }
            Some(_) => {}
        }

        Ok(BondOutcome {
            bond: Bond {
                id: bond_id,
                verb: verb.to_string(),
                from_id: from.id,
                to_id: to.id,
                confidence,
                status: existing.map(|b| b.status).unwrap_or_else(|| "active".into()),
                metadata,
            },
            created: previous_confidence.is_none(),
            previous_confidence,
            signal_id,
        })
    }

    /// Update the confidence of an existing bond by id.
    pub fn update_bond_confidence(
        &self,
        bond_id: &str,
        confidence: f64,
    ) -> Result<BondOutcome, ChoraError> {
        let bond = self
            .get_bond(bond_id)?
            .ok_or_else(|| ChoraError::NotFound(format!("bond {}", bond_id)))?;
        self.manage_bond(
            &bond.verb,
            &bond.from_id,
            &bond.to_id,
            Some(confidence),
            Some(bond.metadata),
        )
    }

    pub fn get_bond(&self, bond_id: &str) -> Result<Option<Bond>, ChoraError> {
        let conn = self.read_conn()?;
        let row = conn
            .query_row(
                "SELECT id, verb, from_id, to_id, confidence, status, metadata FROM bonds WHERE id = ?1",
                params![bond_id],
                bond_from_row,
            )
            .optional()?;
        row.map(finish_bond).transpose()
    }

    pub fn bonds_from(&self, entity_id: &str) -> Result<Vec<Bond>, ChoraError> {
        self.bond_query("SELECT id, verb, from_id, to_id, confidence, status, metadata FROM bonds WHERE from_id = ?1", entity_id)
    }

    pub fn bonds_to(&self, entity_id: &str) -> Result<Vec<Bond>, ChoraError> {
        self.bond_query("SELECT id, verb, from_id, to_id, confidence, status, metadata FROM bonds WHERE to_id = ?1", entity_id)
    }

    fn bond_query(&self, sql: &str, entity_id: &str) -> Result<Vec<Bond>, ChoraError> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![entity_id], bond_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(finish_bond(row?)?);
        }
        Ok(out)
    }

    /// Circles this entity inhabits (targets of its `inhabits` bonds).
    pub fn inhabited_circles(&self, entity_id: &str) -> Result<Vec<String>, ChoraError> {
        let conn = self.read_conn()?;
        let mut stmt =
            conn.prepare("SELECT to_id FROM bonds WHERE from_id = ?1 AND verb = 'inhabits'")?;
        let rows = stmt.query_map(params![entity_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// The 1-hop bond neighborhood, grouped by verb with counterpart
    /// summaries.
    pub fn get_constellation(&self, entity_id: &str) -> Result<Constellation, ChoraError> {
        self.require_entity(entity_id)?;
        let mut outgoing: BTreeMap<String, Vec<ConstellationEdge>> = BTreeMap::new();
        let mut incoming: BTreeMap<String, Vec<ConstellationEdge>> = BTreeMap::new();

        for bond in self.bonds_from(entity_id)? {
            let edge = self.constellation_edge(&bond, &bond.to_id)?;
            outgoing.entry(bond.verb.clone()).or_default().push(edge);
        }
        for bond in self.bonds_to(entity_id)? {
            let edge = self.constellation_edge(&bond, &bond.from_id)?;
            incoming.entry(bond.verb.clone()).or_default().push(edge);
        }

        Ok(Constellation {
            entity_id: entity_id.to_string(),
            outgoing,
            incoming,
        })
    }

    fn constellation_edge(
        &self,
        bond: &Bond,
        counterpart_id: &str,
    ) -> Result<ConstellationEdge, ChoraError> {
        let counterpart = match self.get_entity(counterpart_id)? {
            Some(e) => EntitySummary {
                id: e.id.clone(),
                entity_type: e.entity_type.clone(),
                title: e.title(),
            },
            None => EntitySummary {
                id: counterpart_id.to_string(),
                entity_type: "unknown".to_string(),
                title: counterpart_id.to_string(),
            },
        };
        Ok(ConstellationEdge {
            bond_id: bond.id.clone(),
            counterpart,
            confidence: bond.confidence,
            status: bond.status.clone(),
        })
    }

    // ===== Archive =====

    /// Move an entity into the archive. Refuses when live bonds remain
    /// unless `force`; dangling bonds (counterpart already gone) are
    /// archived first in either case.
    pub fn archive_entity(
        &self,
        entity_id: &str,
        reason: &str,
        archived_by: Option<&str>,
        force: bool,
    ) -> Result<ArchiveRecord, ChoraError> {
        let entity = self.require_entity(entity_id)?;

        let mut live = Vec::new();
        let mut dangling = Vec::new();
        for bond in self
            .bonds_from(entity_id)?
            .into_iter()
            .chain(self.bonds_to(entity_id)?)
        {
            let counterpart = if bond.from_id == entity_id {
                &bond.to_id
            } else {
                &bond.from_id
            };
            if self.get_entity(counterpart)?.is_some() {
                live.push(bond);
            } else {
                dangling.push(bond);
            }
        }

        if !live.is_empty() && !force {
            return Err(ChoraError::ArchiveHasBonds(format!(
                "{} has {} live bonds",
                entity_id,
                live.len()
            )));
        }

        for bond in dangling.iter().chain(live.iter()) {
            self.archive_bond(&bond.id, &format!("archived with {}", entity_id), archived_by)?;
        }

        let archive_id = format!("archive-{}", short_id());
        let archived_at = now_iso();
        let payload = serde_json::to_value(&entity)?;
        let payload_json = payload.to_string();

        self.with_write(
            "entity",
            "entity.archive",
            Some(entity_id),
            json!({ "reason": reason, "archive_id": archive_id }),
            |tx| {
                tx.execute(
                    "INSERT INTO archive (id, kind, original_id, original_type, payload, archived_at, archived_by, reason)
                     VALUES (?1, 'entity', ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![archive_id, entity.id, entity.entity_type, payload_json, archived_at, archived_by, reason],
                )?;
                // Embedding rows cascade with the entity row.
                tx.execute("DELETE FROM entities WHERE id = ?1", params![entity_id])?;
                Ok(())
            },
        )?;
        self.fts_delete(entity_id);

        Ok(ArchiveRecord {
            id: archive_id,
            kind: "entity".to_string(),
            original_id: entity.id,
            original_type: entity.entity_type,
            payload,
            archived_at,
        })
    }

    pub fn archive_bond(
        &self,
        bond_id: &str,
        reason: &str,
        archived_by: Option<&str>,
    ) -> Result<Option<ArchiveRecord>, ChoraError> {
        let Some(bond) = self.get_bond(bond_id)? else {
            return Ok(None);
        };
        let archive_id = format!("archive-bond-{}", short_id());
        let archived_at = now_iso();
        let payload = serde_json::to_value(&bond)?;
        let payload_json = payload.to_string();

        self.with_write(
            "bond",
            "bond.archive",
            Some(bond_id),
            json!({ "reason": reason }),
            |tx| {
                tx.execute(
                    "INSERT INTO archive (id, kind, original_id, original_type, payload, archived_at, archived_by, reason)
                     VALUES (?1, 'bond', ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![archive_id, bond.id, bond.verb, payload_json, archived_at, archived_by, reason],
                )?;
                tx.execute("DELETE FROM bonds WHERE id = ?1", params![bond_id])?;
                Ok(())
            },
        )?;

        Ok(Some(ArchiveRecord {
            id: archive_id,
            kind: "bond".to_string(),
            original_id: bond.id,
            original_type: bond.verb,
            payload,
            archived_at,
        }))
    }

    /// Restore an archived entity to the live relation.
    pub fn resurrect(&self, archive_id: &str) -> Result<Entity, ChoraError> {
        let conn = self.read_conn()?;
        let row = conn
            .query_row(
                "SELECT kind, payload FROM archive WHERE id = ?1",
                params![archive_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?
            .ok_or_else(|| ChoraError::NotFound(format!("archive record {}", archive_id)))?;
        let (kind, payload) = row;
        if kind != "entity" {
            return Err(ChoraError::InvalidData(format!(
                "archive record {} holds a {}, not an entity",
                archive_id, kind
            )));
        }
        let entity: Entity = serde_json::from_str(&payload)?;
        self.with_write(
            "entity",
            "entity.resurrect",
            Some(&entity.id),
            json!({ "archive_id": archive_id }),
            |tx| {
                tx.execute(
                    "INSERT INTO entities (id, type, data, status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        entity.id,
                        entity.entity_type,
                        Value::Object(entity.data.clone()).to_string(),
                        entity.status,
                        entity.created_at,
                        entity.updated_at
                    ],
                )?;
                tx.execute("DELETE FROM archive WHERE id = ?1", params![archive_id])?;
                Ok(())
            },
        )?;
        self.fire_hooks(&entity.id, &entity.entity_type, &entity.data);
        Ok(entity)
    }

    pub fn archived_records(&self, original_id: Option<&str>) -> Result<Vec<ArchiveRecord>, ChoraError> {
        let conn = self.read_conn()?;
        let mut sql = String::from(
            "SELECT id, kind, original_id, original_type, payload, archived_at FROM archive",
        );
        if original_id.is_some() {
            sql.push_str(" WHERE original_id = ?1");
        }
        sql.push_str(" ORDER BY archived_at DESC");
        let mut stmt = conn.prepare(&sql)?;
        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<(String, String, String, String, String, String)> {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        };
        let rows: Vec<_> = match original_id {
            Some(id) => stmt
                .query_map(params![id], map_row)?
                .collect::<rusqlite::Result<_>>()?,
            None => stmt
                .query_map([], map_row)?
                .collect::<rusqlite::Result<_>>()?,
        };
        let mut out = Vec::new();
        for (id, kind, original_id, original_type, payload, archived_at) in rows {
            out.push(ArchiveRecord {
                id,
                kind,
                original_id,
                original_type,
                payload: serde_json::from_str(&payload)?,
                archived_at,
            });
        }
        Ok(out)
    }

    // ===== Embeddings =====

    pub fn save_embedding(
        &self,
        entity_id: &str,
        model_name: &str,
        vector: &[u8],
        dimension: usize,
    ) -> Result<(), ChoraError> {
        self.require_entity(entity_id)?;
        let now = now_iso();
        self.with_write(
            "embedding",
            "embedding.save",
            Some(entity_id),
            json!({ "model": model_name, "dimension": dimension }),
            |tx| {
                // Immutable once written: replace is delete-then-insert.
                tx.execute("DELETE FROM embeddings WHERE entity_id = ?1", params![entity_id])?;
                tx.execute(
                    "INSERT INTO embeddings (entity_id, model_name, vector, dimension, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![entity_id, model_name, vector, dimension as i64, now],
                )?;
                Ok(())
            },
        )
    }

    pub fn get_embedding(&self, entity_id: &str) -> Result<Option<(String, Vec<u8>, usize)>, ChoraError> {
        let conn = self.read_conn()?;
        Ok(conn
            .query_row(
                "SELECT model_name, vector, dimension FROM embeddings WHERE entity_id = ?1",
                params![entity_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, i64>(2)? as usize,
                    ))
                },
            )
            .optional()?)
    }

    pub fn has_embedding(&self, entity_id: &str) -> Result<bool, ChoraError> {
        Ok(self.get_embedding(entity_id)?.is_some())
    }

    pub fn all_embeddings(&self) -> Result<Vec<(String, Vec<u8>, usize)>, ChoraError> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare("SELECT entity_id, vector, dimension FROM embeddings")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, i64>(2)? as usize,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ===== Full-text index =====

    /// (Re)index one entity into the FTS surface. Returns false when FTS5
    /// is unavailable or the entity does not exist.
    pub fn fts_index_entity(&self, entity_id: &str) -> Result<bool, ChoraError> {
        if !self.fts_available {
            return Ok(false);
        }
        let Some(entity) = self.get_entity(entity_id)? else {
            return Ok(false);
        };
        let title = entity.title();
        let body = salient_body(&entity.data);
        let guard = self.writer.lock().expect("store writer poisoned");
        guard.execute("DELETE FROM fts_entities WHERE id = ?1", params![entity.id])?;
        guard.execute(
            "INSERT INTO fts_entities (id, type, title, body) VALUES (?1, ?2, ?3, ?4)",
            params![entity.id, entity.entity_type, title, body],
        )?;
        Ok(true)
    }

    fn fts_delete(&self, entity_id: &str) {
        if !self.fts_available {
            return;
        }
        let guard = self.writer.lock().expect("store writer poisoned");
        let _ = guard.execute("DELETE FROM fts_entities WHERE id = ?1", params![entity_id]);
    }

    pub fn fts_search(
        &self,
        query: &str,
        entity_type: Option<&str>,
        limit: u32,
    ) -> Result<Vec<(String, String, String)>, ChoraError> {
        if !self.fts_available {
            return Ok(Vec::new());
        }
        let conn = self.read_conn()?;
        let sql = if entity_type.is_some() {
            "SELECT id, type, snippet(fts_entities, 3, '[', ']', '…', 64)
             FROM fts_entities WHERE fts_entities MATCH ?1 AND type = ?2 LIMIT ?3"
        } else {
            "SELECT id, type, snippet(fts_entities, 3, '[', ']', '…', 64)
             FROM fts_entities WHERE fts_entities MATCH ?1 LIMIT ?2"
        };
        let mut stmt = conn.prepare(sql)?;
        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<(String, String, String)> {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        };
        let rows: Vec<_> = match entity_type {
            Some(ty) => stmt
                .query_map(params![query, ty, limit], map_row)?
                .collect::<rusqlite::Result<_>>()?,
            None => stmt
                .query_map(params![query, limit], map_row)?
                .collect::<rusqlite::Result<_>>()?,
        };
        Ok(rows)
    }

    // ===== Protocol states =====

    pub fn save_state(&self, state: &StateEntity) -> Result<(), ChoraError> {
        let data = serde_json::to_value(&state.data)?.to_string();
        let status = serde_json::to_value(state.status)?
            .as_str()
            .unwrap_or("pending")
            .to_string();
        self.with_write(
            "state",
            "state.save",
            Some(&state.id),
            json!({ "protocol_id": state.data.protocol_id, "status": status }),
            |tx| {
                tx.execute(
                    "INSERT INTO states (id, protocol_id, status, data)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET status=excluded.status, data=excluded.data",
                    params![state.id, state.data.protocol_id, status, data],
                )?;
                Ok(())
            },
        )
    }

    pub fn load_state(&self, state_id: &str) -> Result<Option<StateEntity>, ChoraError> {
        let conn = self.read_conn()?;
        let row = conn
            .query_row(
                "SELECT id, status, data FROM states WHERE id = ?1",
                params![state_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, status, data)) = row else {
            return Ok(None);
        };
        Ok(Some(StateEntity {
            id,
            status: serde_json::from_value(Value::String(status))?,
            data: serde_json::from_str(&data)?,
        }))
    }

    // ===== Signal outcomes & pulse history =====

    /// Open an outcome record. The matching `finish_outcome` call is
    /// guaranteed by the worker wrapper even across panics.
    pub fn start_outcome(&self, signal_id: &str, protocol_id: &str) -> Result<i64, ChoraError> {
        self.with_write(
            "outcome",
            "outcome.start",
            Some(signal_id),
            json!({ "protocol_id": protocol_id }),
            |tx| {
                tx.execute(
                    "INSERT INTO signal_outcomes (signal_id, protocol_id, started_at, status)
                     VALUES (?1, ?2, ?3, 'started')",
                    params![signal_id, protocol_id, now_iso()],
                )?;
                Ok(tx.last_insert_rowid())
            },
        )
    }

    pub fn finish_outcome(
        &self,
        outcome_id: i64,
        status: &str,
        duration_ms: i64,
        error: Option<&Value>,
    ) -> Result<(), ChoraError> {
        self.with_write(
            "outcome",
            "outcome.finish",
            None,
            json!({ "outcome_id": outcome_id, "status": status }),
            |tx| {
                tx.execute(
                    "UPDATE signal_outcomes SET ended_at = ?1, status = ?2, duration_ms = ?3, error = ?4
                     WHERE id = ?5",
                    params![
                        now_iso(),
                        status,
                        duration_ms,
                        error.map(|e| e.to_string()),
                        outcome_id
                    ],
                )?;
                Ok(())
            },
        )
    }

    pub fn outcomes_for_signal(&self, signal_id: &str) -> Result<Vec<Value>, ChoraError> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT signal_id, protocol_id, started_at, ended_at, status, duration_ms, error
             FROM signal_outcomes WHERE signal_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![signal_id], |row| {
            Ok(json!({
                "signal_id": row.get::<_, String>(0)?,
                "protocol_id": row.get::<_, String>(1)?,
                "started_at": row.get::<_, String>(2)?,
                "ended_at": row.get::<_, Option<String>>(3)?,
                "status": row.get::<_, String>(4)?,
                "duration_ms": row.get::<_, i64>(5)?,
                "error": row.get::<_, Option<String>>(6)?,
            }))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Append a pulse summary, pruning the ring to [`PULSE_RING_SIZE`].
    pub fn record_pulse(
        &self,
        signals_processed: usize,
        errors: usize,
        duration_ms: i64,
    ) -> Result<(), ChoraError> {
        self.with_write(
            "pulse",
            "pulse.record",
            None,
            json!({ "signals_processed": signals_processed, "errors": errors }),
            |tx| {
                tx.execute(
                    "INSERT OR REPLACE INTO pulse_history (ts, signals_processed, errors, duration_ms)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![now_iso(), signals_processed as i64, errors as i64, duration_ms],
                )?;
                tx.execute(
                    "DELETE FROM pulse_history WHERE ts NOT IN
                     (SELECT ts FROM pulse_history ORDER BY ts DESC LIMIT ?1)",
                    params![PULSE_RING_SIZE as i64],
                )?;
                Ok(())
            },
        )
    }

    pub fn pulse_history(&self, limit: u32) -> Result<Vec<Value>, ChoraError> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT ts, signals_processed, errors, duration_ms FROM pulse_history
             ORDER BY ts DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(json!({
                "ts": row.get::<_, String>(0)?,
                "signals_processed": row.get::<_, i64>(1)?,
                "errors": row.get::<_, i64>(2)?,
                "duration_ms": row.get::<_, i64>(3)?,
            }))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Recent event-log rows, newest first.
    pub fn recent_events(&self, limit: u32) -> Result<Vec<Value>, ChoraError> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT seq, event_id, ts, kind, op, entity_id, payload FROM events
             ORDER BY seq DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(json!({
                "seq": row.get::<_, i64>(0)?,
                "event_id": row.get::<_, String>(1)?,
                "ts": row.get::<_, String>(2)?,
                "kind": row.get::<_, String>(3)?,
                "op": row.get::<_, String>(4)?,
                "entity_id": row.get::<_, Option<String>>(5)?,
                "payload": row.get::<_, String>(6)?,
            }))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn bond_from_row(
    row: &rusqlite::Row,
) -> rusqlite::Result<(String, String, String, String, f64, String, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn finish_bond(
    row: (String, String, String, String, f64, String, String),
) -> Result<Bond, ChoraError> {
    let (id, verb, from_id, to_id, confidence, status, metadata) = row;
    Ok(Bond {
        id,
        verb,
        from_id,
        to_id,
        confidence,
        status,
        metadata: serde_json::from_str(&metadata)?,
    })
}

/// Lowercase a reference into a slug: `[^a-z0-9]+` collapses to `-`.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_dash = true;
    for ch in text.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}

/// Title plus best-effort body text for the FTS surface.
fn salient_body(data: &JsonMap) -> String {
    for field in ["description", "statement", "insight", "question", "body"] {
        if let Some(Value::String(s)) = data.get(field) {
            if !s.is_empty() {
                return s.clone();
            }
        }
    }
    Value::Object(data.clone()).to_string()
}

#[cfg(test)]
mod tests {
    use super::slugify;

    #[test]
    fn slugify_collapses_runs() {
        assert_eq!(slugify("Tool: The  Loom!"), "tool-the-loom");
        assert_eq!(slugify("learning-x"), "learning-x");
    }
}
