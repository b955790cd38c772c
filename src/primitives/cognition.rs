//! Cognition-domain primitives: fronts for the semantic layer.
//!
//! Each one degrades gracefully when the vectorizer is absent: the
//! response reports which method ran, never an error.

use serde_json::Value;

use crate::core::context::PrimitiveContext;
use crate::core::error::ChoraError;
use crate::core::model::{JsonMap, Response};
use crate::primitives::{need_str, opt_str, opt_u32};
use crate::semantic;

fn vectorizer(ctx: &PrimitiveContext) -> Option<&dyn semantic::Vectorizer> {
    ctx.vectorizer.as_deref()
}

pub fn embed_entity(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        semantic::embed_entity(&ctx.store, vectorizer(ctx), need_str(inputs, "id")?)
    };
    run().into()
}

pub fn embed_text(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        semantic::embed_text(vectorizer(ctx), need_str(inputs, "text")?)
    };
    run().into()
}

pub fn semantic_similarity(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        semantic::semantic_similarity(&ctx.store, need_str(inputs, "a")?, need_str(inputs, "b")?)
    };
    run().into()
}

pub fn semantic_search(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        semantic::semantic_search(
            &ctx.store,
            vectorizer(ctx),
            need_str(inputs, "query")?,
            opt_str(inputs, "type"),
            opt_u32(inputs, "limit", 10),
        )
    };
    run().into()
}

pub fn suggest_bonds(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        semantic::suggest_bonds(&ctx.store, need_str(inputs, "id")?, opt_u32(inputs, "limit", 10))
    };
    run().into()
}

pub fn detect_clusters(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let threshold = inputs
            .get("threshold")
            .and_then(Value::as_f64)
            .unwrap_or(0.8);
        semantic::detect_clusters(
            &ctx.store,
            need_str(inputs, "type")?,
            threshold,
            opt_u32(inputs, "limit", 100),
        )
    };
    run().into()
}
