//! Graph-domain primitives: entity and bond lifecycle.

use serde_json::{json, Value};

use crate::core::context::PrimitiveContext;
use crate::core::error::ChoraError;
use crate::core::model::{JsonMap, QueryFilter, Response};
use crate::metabolism;
use crate::primitives::{need_str, opt_bool, opt_f64, opt_map, opt_str, opt_u32};

/// Manifest an entity. Circles default to `sync_policy: local-only`.
pub fn manifest_entity(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let entity_type = need_str(inputs, "type")?;
        let entity_id = need_str(inputs, "id")?;
        let mut data = opt_map(inputs, "data");
        if entity_type == "circle" && !data.contains_key("sync_policy") {
            data.insert("sync_policy".into(), json!("local-only"));
        }
        let status = opt_str(inputs, "status");
        let entity = ctx.store.save_entity(entity_id, entity_type, data, status)?;
        Ok(json!({ "id": entity.id, "type": entity.entity_type }))
    };
    run().into()
}

/// Batch form of `manifest-entity`.
pub fn manifest_entities(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let specs = inputs
            .get("entities")
            .and_then(Value::as_array)
            .ok_or_else(|| ChoraError::InvalidData("'entities' must be a list".into()))?;
        let mut manifested = Vec::new();
        for spec in specs {
            let Some(map) = spec.as_object() else {
                continue;
            };
            let (Some(entity_type), Some(entity_id)) = (
                map.get("type").and_then(Value::as_str),
                map.get("id").and_then(Value::as_str),
            ) else {
                continue;
            };
            let mut data = map
                .get("data")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            if entity_type == "circle" && !data.contains_key("sync_policy") {
                data.insert("sync_policy".into(), json!("local-only"));
            }
            let entity = ctx.store.save_entity(entity_id, entity_type, data, None)?;
            manifested.push(json!({ "id": entity.id, "type": entity.entity_type }));
        }
        Ok(json!({ "count": manifested.len(), "manifested": manifested }))
    };
    run().into()
}

/// Create or update a bond. Physics-checked; tentative and downgraded
/// bonds emit epistemic signals.
pub fn manage_bond(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let verb = need_str(inputs, "verb")?;
        let from = need_str(inputs, "from")?;
        let to = need_str(inputs, "to")?;
        let confidence = opt_f64(inputs, "confidence");
        let metadata = inputs.get("metadata").and_then(Value::as_object).cloned();
        let outcome = ctx.store.manage_bond(verb, from, to, confidence, metadata)?;
        Ok(json!({
            "id": outcome.bond.id,
            "verb": outcome.bond.verb,
            "from": outcome.bond.from_id,
            "to": outcome.bond.to_id,
            "confidence": outcome.bond.confidence,
            "created": outcome.created,
            "signal_id": outcome.signal_id,
        }))
    };
    run().into()
}

pub fn update_bond_confidence(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let bond_id = need_str(inputs, "bond_id")?;
        let confidence = opt_f64(inputs, "confidence")
            .ok_or_else(|| ChoraError::InvalidData("'confidence' must be a number".into()))?;
        let outcome = ctx.store.update_bond_confidence(bond_id, confidence)?;
        Ok(json!({
            "id": outcome.bond.id,
            "previous": outcome.previous_confidence,
            "new": outcome.bond.confidence,
            "signal_id": outcome.signal_id,
        }))
    };
    run().into()
}

pub fn entity_get(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let entity = ctx.store.require_entity(need_str(inputs, "id")?)?;
        Ok(serde_json::to_value(entity)?)
    };
    run().into()
}

/// Merge a patch into an entity's data. `updated_at` advances; the
/// store cascades embedding invalidation.
pub fn entity_update(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let entity_id = need_str(inputs, "id")?;
        let patch = inputs
            .get("patch")
            .and_then(Value::as_object)
            .ok_or_else(|| ChoraError::InvalidData("'patch' must be an object".into()))?;
        let entity = ctx.store.require_entity(entity_id)?;
        let mut data = entity.data;
        for (k, v) in patch {
            data.insert(k.clone(), v.clone());
        }
        let status = patch.get("status").and_then(Value::as_str);
        let updated = ctx
            .store
            .save_entity(entity_id, &entity.entity_type, data, status)?;
        Ok(json!({ "id": updated.id, "updated_at": updated.updated_at }))
    };
    run().into()
}

pub fn entities_query(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let filter = QueryFilter {
            entity_type: opt_str(inputs, "type").map(str::to_string),
            status: opt_str(inputs, "status").map(str::to_string),
            since: opt_str(inputs, "since").map(str::to_string),
            limit: Some(opt_u32(inputs, "limit", 100)),
            ..Default::default()
        };
        let rows: Vec<Value> = ctx
            .store
            .query_entities(&filter)?
            .into_iter()
            .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
            .collect();
        Ok(json!({ "rows": rows }))
    };
    run().into()
}

pub fn constellation_get(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let constellation = ctx.store.get_constellation(need_str(inputs, "id")?)?;
        Ok(serde_json::to_value(constellation)?)
    };
    run().into()
}

pub fn compost(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let entity_id = need_str(inputs, "id")?;
        let force = opt_bool(inputs, "force", false);
        metabolism::compost(&ctx.store, entity_id, force)
    };
    run().into()
}

pub fn resurrect(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let entity = ctx.store.resurrect(need_str(inputs, "archive_id")?)?;
        Ok(json!({ "id": entity.id, "type": entity.entity_type }))
    };
    run().into()
}
