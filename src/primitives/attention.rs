//! Attention-domain primitives: signals and focuses.

use serde_json::{json, Value};

use crate::core::context::PrimitiveContext;
use crate::core::error::ChoraError;
use crate::core::model::{JsonMap, QueryFilter, Response};
use crate::core::store::slugify;
use crate::core::time::{now_iso, short_id};
use crate::metabolism;
use crate::primitives::{need_str, opt_map, opt_str, opt_u32};

pub fn emit_signal(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let title = need_str(inputs, "title")?;
        let mut extra = opt_map(inputs, "data");
        if let Some(description) = opt_str(inputs, "description") {
            extra.insert("description".into(), json!(description));
        }
        let signal_id = ctx.store.emit_signal(
            title,
            opt_str(inputs, "source_id"),
            opt_str(inputs, "signal_type").unwrap_or("attention"),
            opt_str(inputs, "urgency").unwrap_or("normal"),
            None,
            extra,
        )?;
        Ok(json!({ "id": signal_id, "status": "active" }))
    };
    run().into()
}

/// Explicitly resolve a signal. Non-active signals fail with
/// `already_resolved`.
pub fn signal_resolve(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let signal_id = need_str(inputs, "signal_id")?;
        let signal = ctx.store.require_entity(signal_id)?;
        if signal.entity_type != "signal" {
            return Err(ChoraError::InvalidData(format!(
                "{} is a {}, not a signal",
                signal_id, signal.entity_type
            )));
        }
        if signal.status != "active" {
            return Err(ChoraError::AlreadyResolved(format!(
                "{} is already {}",
                signal_id, signal.status
            )));
        }
        let mut data = signal.data;
        data.insert("status".into(), json!("resolved"));
        data.insert("resolved_at".into(), json!(now_iso()));
        if let Some(resolution) = opt_str(inputs, "resolution") {
            data.insert("resolution".into(), json!(resolution));
        }
        ctx.store
            .save_entity(signal_id, "signal", data, Some("resolved"))?;
        Ok(json!({ "id": signal_id, "status": "resolved" }))
    };
    run().into()
}

/// Open a focus. With a `signal_id`, a `triggers` bond connects the
/// signal to the new focus.
pub fn focus_create(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let title = need_str(inputs, "title")?;
        let focus_id = format!("focus-{}-{}", slugify(title), short_id());
        let mut data = opt_map(inputs, "data");
        data.insert("title".into(), json!(title));
        data.insert("status".into(), json!("active"));
        data.insert("opened_at".into(), json!(now_iso()));
        ctx.store
            .save_entity(&focus_id, "focus", data, Some("active"))?;

        let mut bond_id = None;
        if let Some(signal_id) = opt_str(inputs, "signal_id") {
            let outcome = ctx
                .store
                .manage_bond("triggers", signal_id, &focus_id, None, None)?;
            bond_id = Some(outcome.bond.id);
        }
        Ok(json!({ "id": focus_id, "status": "active", "bond_id": bond_id }))
    };
    run().into()
}

/// Resolve a focus with outcome `completed` or `abandoned`. Completion
/// with a `learning` text manifests a learning crystallized from the
/// focus.
pub fn focus_resolve(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let focus_id = need_str(inputs, "focus_id")?;
        let outcome = need_str(inputs, "outcome")?;
        if outcome != "completed" && outcome != "abandoned" {
            return Err(ChoraError::InvalidData(format!(
                "outcome must be completed or abandoned, got {}",
                outcome
            )));
        }
        let focus = ctx.store.require_entity(focus_id)?;
        if focus.entity_type != "focus" {
            return Err(ChoraError::InvalidData(format!(
                "{} is a {}, not a focus",
                focus_id, focus.entity_type
            )));
        }
        if focus.status != "active" {
            return Err(ChoraError::AlreadyResolved(format!(
                "{} is already {}",
                focus_id, focus.status
            )));
        }

        let mut data = focus.data;
        data.insert("status".into(), json!("resolved"));
        data.insert("outcome".into(), json!(outcome));
        data.insert("resolved_at".into(), json!(now_iso()));
        ctx.store
            .save_entity(focus_id, "focus", data, Some("resolved"))?;

        let mut learning_id = None;
        if outcome == "completed" {
            if let Some(insight) = opt_str(inputs, "learning") {
                let id = format!("learning-{}-{}", slugify(insight), short_id());
                let mut learning = JsonMap::new();
                learning.insert("title".into(), json!(insight));
                learning.insert("insight".into(), json!(insight));
                ctx.store.save_entity(&id, "learning", learning, None)?;
                ctx.store
                    .manage_bond("crystallized-from", &id, focus_id, None, None)?;
                learning_id = Some(id);
            }
        }
        Ok(json!({
            "id": focus_id,
            "status": "resolved",
            "outcome": outcome,
            "learning_id": learning_id,
        }))
    };
    run().into()
}

pub fn focus_list_active(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let filter = QueryFilter {
            entity_type: Some("focus".to_string()),
            status: Some("active".to_string()),
            limit: Some(opt_u32(inputs, "limit", 50)),
            ..Default::default()
        };
        let rows: Vec<Value> = ctx
            .store
            .query_entities(&filter)?
            .into_iter()
            .map(|e| json!({ "id": e.id, "title": e.title(), "opened_at": e.created_at }))
            .collect();
        Ok(json!({ "rows": rows }))
    };
    run().into()
}

pub fn detect_stagnation(ctx: &PrimitiveContext, _inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> { metabolism::detect_stagnation(&ctx.store) };
    run().into()
}
