//! Chora: an event-sourced graph virtual machine.
//!
//! Durable state is a typed entity/bond graph in SQLite. A caller submits
//! an *intent* (the name of a protocol or primitive) plus inputs; the
//! engine resolves the intent, executes it against the graph, and returns
//! a structured result. Protocols are entities whose body is a node graph
//! executed by the VM; primitives are native operations exposed to it.
//! A background pulse metabolizes attention: it dispatches triggered
//! protocols for active signals, ages entities into stagnation, and
//! auto-resolves signals whose condition has cleared.
//!
//! # Architecture
//!
//! - [`core::store`]: typed entity persistence, bond physics, save hooks,
//!   embeddings, archive, FTS
//! - [`core::vm`]: the protocol interpreter
//! - [`core::engine`]: intent normalization and dispatch (the single
//!   event horizon)
//! - [`pulse`]: signal processing, stagnation, auto-resolution
//! - [`sync_router`] / [`sync_bridge`] / [`keyring`]: per-entity sync
//!   decisions from `inhabits` bonds and circle policy
//! - [`semantic`]: embeddings, similarity, suggestion, clustering, with
//!   graceful degradation throughout
//!
//! # Example
//!
//! ```no_run
//! use chora::core::engine::{DispatchOptions, Engine};
//! use chora::core::store::Store;
//! use serde_json::json;
//!
//! let store = Store::open("chora.db").unwrap();
//! let engine = Engine::new(store);
//! let result = engine.dispatch(
//!     "manifest_entity",
//!     json!({ "type": "inquiry", "id": "inquiry-what-now", "data": { "title": "What now?" } }),
//!     DispatchOptions::default(),
//! );
//! assert!(result.ok);
//! ```

pub mod cli;
pub mod core;
pub mod invitation;
pub mod keyring;
pub mod metabolism;
pub mod primitives;
pub mod pulse;
pub mod semantic;
pub mod sync_bridge;
pub mod sync_router;
pub mod worker;

pub use crate::core::engine::{DispatchOptions, Engine};
pub use crate::core::error::{ChoraError, ErrorKind};
pub use crate::core::model::{DispatchResult, Response};
pub use crate::core::store::Store;

/// CLI entry point; returns the process exit code.
pub fn run() -> i32 {
    cli::run()
}
