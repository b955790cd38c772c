//! The I/O membrane and primitive execution context.
//!
//! All user-visible text flows through an [`OutputSink`]; handlers never
//! write to stdout directly. The CLI injects a stdout sink, tests inject a
//! buffer, and servers can inject whatever collector they need.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::core::store::Store;
use crate::semantic::Vectorizer;

pub trait OutputSink: Send + Sync {
    fn emit(&self, text: &str);
}

/// Default sink: plain stdout lines.
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn emit(&self, text: &str) {
        println!("{}", text);
    }
}

/// Collecting sink for tests and buffered callers.
#[derive(Default)]
pub struct BufferSink {
    lines: Mutex<Vec<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut self.lines.lock().expect("buffer sink poisoned"))
    }
}

impl OutputSink for BufferSink {
    fn emit(&self, text: &str) {
        self.lines
            .lock()
            .expect("buffer sink poisoned")
            .push(text.to_string());
    }
}

/// Context injected into every primitive call.
///
/// Carries the shared store handle, the output membrane, the optional
/// vectorizer, persona attribution, and the dispatch deadline.
pub struct PrimitiveContext {
    pub store: Arc<Store>,
    pub sink: Arc<dyn OutputSink>,
    pub persona_id: Option<String>,
    pub vectorizer: Option<Arc<dyn Vectorizer>>,
    pub deadline: Option<Instant>,
}

impl PrimitiveContext {
    pub fn emit(&self, text: &str) {
        self.sink.emit(text);
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.map(|d| Instant::now() > d).unwrap_or(false)
    }
}
