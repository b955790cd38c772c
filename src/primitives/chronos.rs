//! Chronos-domain primitives.

use chrono::{Duration, Utc};
use serde_json::{json, Value};

use crate::core::context::PrimitiveContext;
use crate::core::error::ChoraError;
use crate::core::model::{JsonMap, Response};
use crate::core::time::now_iso;

pub fn timestamp_now(_ctx: &PrimitiveContext, _inputs: &JsonMap) -> Response {
    Response::ok(json!({ "ts": now_iso() }))
}

pub fn timestamp_offset(_ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let days = inputs.get("days").and_then(Value::as_i64).unwrap_or(0);
        let hours = inputs.get("hours").and_then(Value::as_i64).unwrap_or(0);
        let ts = (Utc::now() + Duration::days(days) + Duration::hours(hours))
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        Ok(json!({ "ts": ts }))
    };
    run().into()
}
