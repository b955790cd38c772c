//! Logic-domain primitives: pure value plumbing for protocols.

use serde_json::{json, Value};

use crate::core::context::PrimitiveContext;
use crate::core::error::ChoraError;
use crate::core::model::{JsonMap, Response};
use crate::core::vm::resolve_value;
use crate::primitives::{need_str, opt_map};

pub fn identity(_ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    Response::ok(inputs.get("value").cloned().unwrap_or(Value::Null))
}

/// Walk a dot path into a JSON value. Missing segments resolve to null.
pub fn json_get(_ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let path = need_str(inputs, "path")?;
        let mut current = inputs.get("value").cloned().unwrap_or(Value::Null);
        for segment in path.split('.') {
            current = match &current {
                Value::Object(map) => map.get(segment).cloned().unwrap_or(Value::Null),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            };
        }
        Ok(json!({ "value": current }))
    };
    run().into()
}

pub fn list_length(_ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let items = inputs
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| ChoraError::InvalidData("'items' must be a list".into()))?;
        Ok(json!({ "length": items.len() }))
    };
    run().into()
}

pub fn list_slice(_ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let items = inputs
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| ChoraError::InvalidData("'items' must be a list".into()))?;
        let start = inputs
            .get("start")
            .and_then(Value::as_u64)
            .unwrap_or(0)
            .min(items.len() as u64) as usize;
        let end = inputs
            .get("end")
            .and_then(Value::as_u64)
            .unwrap_or(items.len() as u64)
            .min(items.len() as u64) as usize;
        let slice: Vec<Value> = items[start..end.max(start)].to_vec();
        Ok(json!({ "items": slice }))
    };
    run().into()
}

/// Render `{$.name}` interpolations in a template against `values`.
pub fn string_format(_ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let template = need_str(inputs, "template")?;
        let values = opt_map(inputs, "values");
        let rendered = resolve_value(&Value::String(template.to_string()), &values);
        Ok(json!({ "text": rendered }))
    };
    run().into()
}
