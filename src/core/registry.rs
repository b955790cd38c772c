//! The primitive registry: name → native handler.
//!
//! Primitives are compile-time records (plain fn pointers), grouped by
//! domain. Registration order does not affect semantics; the registry is
//! read-only after construction.

use std::collections::BTreeMap;

use crate::core::context::PrimitiveContext;
use crate::core::model::{Capability, CapabilityKind, InterfaceSpec, JsonMap, Response};

pub type PrimitiveFn = fn(&PrimitiveContext, &JsonMap) -> Response;

#[derive(Clone, Copy)]
pub struct PrimitiveRecord {
    /// Canonical id, `primitive-{name}`.
    pub id: &'static str,
    /// Domain: attention, build, chronos, cognition, graph, io, logic, sys.
    pub domain: &'static str,
    pub description: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
    pub handler: PrimitiveFn,
}

#[derive(Default)]
pub struct PrimitiveRegistry {
    by_id: BTreeMap<&'static str, PrimitiveRecord>,
}

impl PrimitiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all builtin primitives installed.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for record in crate::primitives::BUILTINS {
            registry.register(*record);
        }
        registry
    }

    pub fn register(&mut self, record: PrimitiveRecord) {
        self.by_id.insert(record.id, record);
    }

    pub fn get(&self, primitive_id: &str) -> Option<&PrimitiveRecord> {
        self.by_id.get(primitive_id)
    }

    pub fn contains(&self, primitive_id: &str) -> bool {
        self.by_id.contains_key(primitive_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Enumerate primitives as dispatchable capabilities.
    pub fn capabilities(&self) -> Vec<Capability> {
        self.by_id
            .values()
            .map(|record| Capability {
                id: record.id.to_string(),
                kind: CapabilityKind::Primitive,
                description: record.description.to_string(),
                interface: InterfaceSpec {
                    required: record.required.iter().map(|s| s.to_string()).collect(),
                    optional: record.optional.iter().map(|s| s.to_string()).collect(),
                },
            })
            .collect()
    }
}
