//! Metabolic operations: composting, stagnation detection, and signal
//! auto-resolution.
//!
//! Dead branches are not waste. Composting archives an entity and digests
//! the event into a learning; stagnation detection turns silence into
//! signals; auto-resolution retires signals whose triggering condition has
//! cleared.

use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::core::error::ChoraError;
use crate::core::model::{JsonMap, QueryFilter};
use crate::core::store::{slugify, Store};
use crate::core::time::{now_iso, older_than_days, parse_iso, short_id};

/// Built-in stagnation TTLs, overridable by principle entities.
const DEFAULT_TTLS: &[(&str, i64)] = &[("inquiry", 30), ("signal", 7)];

/// Statuses that exempt an entity from stagnation.
const SETTLED_STATUSES: &[&str] = &["resolved", "completed", "failed", "archived", "deprecated"];

/// Archive an orphaned entity, creating a learning about the
/// decomposition. Refuses while live bonds remain unless `force`.
pub fn compost(store: &Store, entity_id: &str, force: bool) -> Result<Value, ChoraError> {
    let entity = store.require_entity(entity_id)?;

    let mut live_bonds = 0usize;
    let mut total_bonds = 0usize;
    for bond in store
        .bonds_from(entity_id)?
        .into_iter()
        .chain(store.bonds_to(entity_id)?)
    {
        total_bonds += 1;
        let counterpart = if bond.from_id == entity_id {
            &bond.to_id
        } else {
            &bond.from_id
        };
        if store.get_entity(counterpart)?.is_some() {
            live_bonds += 1;
        }
    }
    if live_bonds > 0 && !force {
        return Err(ChoraError::ArchiveHasBonds(format!(
            "{} has {} live bonds",
            entity_id, live_bonds
        )));
    }

    let learning_id = format!(
        "learning-composted-{}-{}",
        slugify(&entity.entity_type),
        short_id()
    );
    let mut learning = JsonMap::new();
    learning.insert(
        "title".into(),
        json!(format!("Composted {}: {}", entity.entity_type, entity_id)),
    );
    learning.insert(
        "insight".into(),
        json!(format!(
            "Entity '{}' was composted with {} bonds archived.",
            entity.title(),
            total_bonds
        )),
    );
    learning.insert("domain".into(), json!("metabolism"));
    learning.insert("composted_id".into(), json!(entity_id));
    learning.insert("composted_type".into(), json!(entity.entity_type));
    store.save_entity(&learning_id, "learning", learning, None)?;

    let record = store.archive_entity(entity_id, "composted", Some("metabolism.compost"), true)?;

    Ok(json!({
        "archived": true,
        "archive_id": record.id,
        "learning_id": learning_id,
        "bonds_archived": total_bonds,
    }))
}

fn principle_pattern() -> Regex {
    Regex::new(r"^principle-([a-z0-9]+)-stagnates-after-(\d+)-days$").expect("valid pattern")
}

/// TTL thresholds: built-in defaults overlaid with
/// `principle-{kind}-stagnates-after-{N}-days` entities.
fn ttl_thresholds(store: &Store) -> Result<BTreeMap<String, i64>, ChoraError> {
    let mut thresholds: BTreeMap<String, i64> = DEFAULT_TTLS
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect();
    let pattern = principle_pattern();
    let filter = QueryFilter {
        entity_type: Some("principle".to_string()),
        limit: Some(500),
        ..Default::default()
    };
    for principle in store.query_entities(&filter)? {
        if let Some(caps) = pattern.captures(&principle.id) {
            if let Ok(days) = caps[2].parse::<i64>() {
                thresholds.insert(caps[1].to_string(), days);
            }
        }
    }
    Ok(thresholds)
}

/// Scan for entities older than their TTL and emit escalation signals.
///
/// A stagnation signal is not re-emitted while an active one already
/// tracks the same entity.
pub fn detect_stagnation(store: &Store) -> Result<Value, ChoraError> {
    let thresholds = ttl_thresholds(store)?;
    let mut emitted = Vec::new();

    let active_trackers: Vec<String> = store
        .query_entities(&QueryFilter {
            entity_type: Some("signal".to_string()),
            status: Some("active".to_string()),
            data_eq: vec![("category".to_string(), json!("stagnation"))],
            limit: Some(1000),
            ..Default::default()
        })?
        .into_iter()
        .filter_map(|s| {
            s.data
                .get("tracks")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect();

    for (entity_type, ttl_days) in &thresholds {
        let filter = QueryFilter {
            entity_type: Some(entity_type.clone()),
            limit: Some(1000),
            ..Default::default()
        };
        for entity in store.query_entities(&filter)? {
            if SETTLED_STATUSES.contains(&entity.status.as_str()) {
                continue;
            }
            if !older_than_days(&entity.created_at, *ttl_days) {
                continue;
            }
            if active_trackers.iter().any(|t| t == &entity.id) {
                continue;
            }

            let escalation = entity.entity_type == "signal";
            let title = if escalation {
                format!("Escalation: {} is stuck", entity.id)
            } else {
                format!("Stagnation detected: {}", entity.id)
            };
            let mut extra = JsonMap::new();
            extra.insert("tracks".into(), json!(entity.id));
            extra.insert("resolves_when".into(), json!("entity-updated"));
            extra.insert("entity_type".into(), json!(entity.entity_type));
            extra.insert("ttl_days".into(), json!(ttl_days));
            let signal_id = store.emit_signal(
                &title,
                Some(&entity.id),
                if escalation { "escalation" } else { "stagnation-detected" },
                "normal",
                Some("stagnation"),
                extra,
            )?;
            emitted.push(json!({
                "id": signal_id,
                "tracks": entity.id,
                "entity_type": entity.entity_type,
                "category": "stagnation",
            }));
        }
    }

    Ok(json!({ "signals_emitted": emitted }))
}

/// Re-evaluate active signals with a `tracks` reference and a
/// `resolves_when` predicate; resolve those whose condition cleared.
///
/// Predicates: `bond-added` (tracked entity has a bond), `entity-updated`
/// (tracked entity updated after the signal was emitted), `void-cleared`
/// (tracked entity archived or settled).
pub fn check_auto_resolution(store: &Store) -> Result<Value, ChoraError> {
    let signals = store.query_entities(&QueryFilter {
        entity_type: Some("signal".to_string()),
        status: Some("active".to_string()),
        limit: Some(1000),
        ..Default::default()
    })?;

    let mut resolved = Vec::new();
    for signal in signals {
        let Some(tracked_id) = signal.data.get("tracks").and_then(Value::as_str) else {
            continue;
        };
        let Some(predicate) = signal.data.get("resolves_when").and_then(Value::as_str) else {
            continue;
        };

        let tracked = store.get_entity(tracked_id)?;
        let cleared = match predicate {
            "bond-added" => match &tracked {
                Some(t) => {
                    !store.bonds_from(&t.id)?.is_empty() || !store.bonds_to(&t.id)?.is_empty()
                }
                None => false,
            },
            "entity-updated" => match &tracked {
                Some(t) => {
                    let updated = parse_iso(&t.updated_at);
                    let emitted = parse_iso(&signal.created_at);
                    matches!((updated, emitted), (Some(u), Some(e)) if u > e)
                }
                None => false,
            },
            "void-cleared" => match &tracked {
                Some(t) => SETTLED_STATUSES.contains(&t.status.as_str()),
                None => true,
            },
            _ => false,
        };

        if cleared {
            let mut data = signal.data.clone();
            data.insert("status".into(), json!("resolved"));
            data.insert(
                "resolution".into(),
                json!(format!("auto-resolved: {}", predicate)),
            );
            data.insert("resolved_at".into(), json!(now_iso()));
            store.save_entity(&signal.id, "signal", data, Some("resolved"))?;
            resolved.push(signal.id);
        }
    }

    Ok(json!({ "resolved_signals": resolved }))
}
