//! Sys-domain primitives.

use serde_json::{json, Value};

use crate::core::context::PrimitiveContext;
use crate::core::error::ChoraError;
use crate::core::model::{JsonMap, Response};
use crate::primitives::{need_str, opt_str};

pub fn sys_log(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let message = need_str(inputs, "message")?;
        let level = opt_str(inputs, "level").unwrap_or("info");
        ctx.emit(&format!("[{}] {}", level, message));
        Ok(json!({ "logged": true }))
    };
    run().into()
}

/// Read-only SQL against the store. Anything that is not a single SELECT
/// is rejected; mutations must go through the event-sourced write path.
pub fn sqlite_query(ctx: &PrimitiveContext, inputs: &JsonMap) -> Response {
    let run = || -> Result<Value, ChoraError> {
        let sql = need_str(inputs, "sql")?.trim();
        if !sql.to_lowercase().starts_with("select") || sql.contains(';') {
            return Err(ChoraError::InvalidData(
                "sqlite-query accepts a single SELECT statement".into(),
            ));
        }
        let conn = ctx.store.read_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows_out = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut obj = serde_json::Map::new();
            for (i, name) in column_names.iter().enumerate() {
                let value = match row.get_ref(i)? {
                    rusqlite::types::ValueRef::Null => Value::Null,
                    rusqlite::types::ValueRef::Integer(v) => json!(v),
                    rusqlite::types::ValueRef::Real(v) => json!(v),
                    rusqlite::types::ValueRef::Text(t) => {
                        json!(String::from_utf8_lossy(t).to_string())
                    }
                    rusqlite::types::ValueRef::Blob(b) => json!(format!("<blob {} bytes>", b.len())),
                };
                obj.insert(name.clone(), value);
            }
            rows_out.push(Value::Object(obj));
        }
        Ok(json!({ "rows": rows_out }))
    };
    run().into()
}
