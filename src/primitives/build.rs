//! Build-domain primitives: self-truth over the verification loop.

use serde_json::{json, Value};

use crate::core::context::PrimitiveContext;
use crate::core::error::ChoraError;
use crate::core::model::{JsonMap, QueryFilter, Response};

/// Coverage of behaviors by `verifies` bonds. The tension loop is healthy
/// when every behavior has a tool verifying it.
pub fn integrity_check(ctx: &PrimitiveContext, _inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let behaviors = ctx.store.query_entities(&QueryFilter {
            entity_type: Some("behavior".to_string()),
            limit: Some(1000),
            ..Default::default()
        })?;
        let mut unverified = Vec::new();
        for behavior in &behaviors {
            let verified = ctx
                .store
                .bonds_to(&behavior.id)?
                .iter()
                .any(|b| b.verb == "verifies");
            if !verified {
                unverified.push(json!({ "id": behavior.id, "title": behavior.title() }));
            }
        }
        let total = behaviors.len();
        let covered = total - unverified.len();
        let coverage = if total > 0 {
            covered as f64 / total as f64
        } else {
            1.0
        };
        Ok(json!({
            "behaviors": total,
            "verified": covered,
            "coverage": coverage,
            "unverified": unverified,
        }))
    };
    run().into()
}
