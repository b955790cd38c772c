//! Background protocol execution with guaranteed outcome recording.
//!
//! Every execution opens a `signal_outcomes` row before the protocol runs
//! and closes it with exactly one terminal status (completed, failed, or
//! panicked) before the result reaches the caller. The panic guard means
//! a crashing protocol can never leave a dangling `started` record.

use serde_json::{json, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::core::engine::{DispatchOptions, Engine};
use crate::core::error::ErrorKind;
use crate::core::model::DispatchResult;

/// Execute a protocol for a signal, recording the outcome around the run.
pub fn execute_recorded(
    engine: &Engine,
    signal_id: &str,
    protocol_id: &str,
    inputs: Value,
    opts: DispatchOptions,
) -> DispatchResult {
    let outcome_id = match engine.store().start_outcome(signal_id, protocol_id) {
        Ok(id) => Some(id),
        Err(e) => {
            eprintln!("failed to open outcome record for {}: {}", signal_id, e);
            None
        }
    };

    let started = Instant::now();
    let result = catch_unwind(AssertUnwindSafe(|| {
        engine.dispatch(protocol_id, inputs, opts)
    }));
    let duration_ms = started.elapsed().as_millis() as i64;

    let (dispatch, status, error) = match result {
        Ok(dispatch) => {
            if dispatch.ok {
                (dispatch, "completed", None)
            } else {
                let error = json!({
                    "kind": dispatch
                        .error_kind
                        .map(|k| k.as_str().to_string())
                        .unwrap_or_else(|| "execution_error".into()),
                    "message": dispatch.error_message.clone().unwrap_or_default(),
                });
                (dispatch, "failed", Some(error))
            }
        }
        Err(_) => (
            DispatchResult::failure(ErrorKind::ExecutionError, "protocol execution panicked"),
            "panicked",
            Some(json!({ "kind": "execution_error", "message": "panic" })),
        ),
    };

    if let Some(outcome_id) = outcome_id {
        if let Err(e) =
            engine
                .store()
                .finish_outcome(outcome_id, status, duration_ms, error.as_ref())
        {
            eprintln!("failed to close outcome record {}: {}", outcome_id, e);
        }
    }

    dispatch
}

/// Run a protocol on a worker thread. The outcome record is closed before
/// the join handle yields the result.
pub fn spawn_protocol(
    engine: Arc<Engine>,
    signal_id: String,
    protocol_id: String,
    inputs: Value,
) -> JoinHandle<DispatchResult> {
    thread::spawn(move || {
        execute_recorded(
            &engine,
            &signal_id,
            &protocol_id,
            inputs,
            DispatchOptions::default(),
        )
    })
}
