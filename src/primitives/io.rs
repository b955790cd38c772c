//! IO-domain primitives: the full-text surface and the output membrane.

use serde_json::{json, Value};

use crate::core::context::PrimitiveContext;
use crate::core::error::ChoraError;
use crate::core::model::{JsonMap, Response};
use crate::primitives::{need_str, opt_str, opt_u32};

pub fn fts_index_entity(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let indexed = ctx.store.fts_index_entity(need_str(inputs, "id")?)?;
        Ok(json!({ "indexed": indexed }))
    };
    run().into()
}

pub fn fts_search(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let rows: Vec<Value> = ctx
            .store
            .fts_search(
                need_str(inputs, "query")?,
                opt_str(inputs, "type"),
                opt_u32(inputs, "limit", 20),
            )?
            .into_iter()
            .map(|(id, ty, snippet)| json!({ "id": id, "type": ty, "snippet": snippet }))
            .collect();
        Ok(json!({ "rows": rows }))
    };
    run().into()
}

/// Emit text through the sink. The membrane is the only way a primitive
/// reaches the user.
pub fn render(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let text = need_str(inputs, "text")?;
        ctx.emit(text);
        Ok(json!({ "rendered": true }))
    };
    run().into()
}
