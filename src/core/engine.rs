//! The engine: the single event horizon where every interface converges.
//!
//! A front end hands an intent plus inputs to `dispatch`; the engine
//! resolves the intent to a protocol or primitive, validates the declared
//! inputs, executes, and returns one uniform result envelope. Creating a
//! protocol entity makes it dispatchable immediately, with no host code.

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::core::context::{OutputSink, PrimitiveContext, StdoutSink};
use crate::core::error::{ChoraError, ErrorKind};
use crate::core::model::{
    Capability, CapabilityKind, DispatchResult, InterfaceSpec, JsonMap, ProtocolData,
    ProtocolEntity, Response, StateStatus,
};
use crate::core::registry::PrimitiveRegistry;
use crate::core::store::Store;
use crate::core::time::new_event_id;
use crate::core::vm::{ProtocolVm, DEFAULT_FUEL};
use crate::semantic::Vectorizer;

/// Per-dispatch options: the output membrane, persona attribution, an
/// optional deadline, and an optional state id for tracking.
#[derive(Default)]
pub struct DispatchOptions {
    pub sink: Option<Arc<dyn OutputSink>>,
    pub persona_id: Option<String>,
    pub deadline: Option<Instant>,
    pub state_id: Option<String>,
}

pub struct Engine {
    store: Arc<Store>,
    registry: Arc<PrimitiveRegistry>,
    vectorizer: Option<Arc<dyn Vectorizer>>,
    fuel: u32,
}

impl Engine {
    pub fn new(store: Arc<Store>) -> Self {
        Engine {
            store,
            registry: Arc::new(PrimitiveRegistry::builtin()),
            vectorizer: None,
            fuel: DEFAULT_FUEL,
        }
    }

    /// Inject a vectorizer; semantic primitives fall back without one.
    pub fn with_vectorizer(mut self, vectorizer: Arc<dyn Vectorizer>) -> Self {
        self.vectorizer = Some(vectorizer);
        self
    }

    /// Override the VM step budget.
    pub fn with_fuel(mut self, fuel: u32) -> Self {
        self.fuel = fuel;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<PrimitiveRegistry> {
        &self.registry
    }

    /// Enumerate every dispatchable capability: protocol entities from the
    /// store plus primitives from the registry.
    pub fn capabilities(&self) -> Result<Vec<Capability>, ChoraError> {
        let mut out = Vec::new();
        let filter = crate::core::model::QueryFilter {
            entity_type: Some("protocol".to_string()),
            limit: Some(1000),
            ..Default::default()
        };
        for entity in self.store.query_entities(&filter)? {
            let description = entity
                .data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let interface = entity
                .data
                .get("interface")
                .cloned()
                .map(|v| serde_json::from_value(v).unwrap_or_default())
                .unwrap_or_else(InterfaceSpec::default);
            out.push(Capability {
                id: entity.id,
                kind: CapabilityKind::Protocol,
                description,
                interface,
            });
        }
        out.extend(self.registry.capabilities());
        Ok(out)
    }

    /// Resolve an intent to a capability id.
    ///
    /// Resolution order: verbatim id, `protocol-{intent}`,
    /// `primitive-{intent}`, then the same three with `_`/`-`
    /// normalization. Protocols beat primitives on every tie.
    pub fn resolve_intent(&self, intent: &str) -> Result<Option<(CapabilityKind, String)>, ChoraError> {
        let normalized = intent.replace('_', "-");
        let mut candidates: Vec<String> = vec![
            intent.to_string(),
            format!("protocol-{}", intent),
            format!("primitive-{}", intent),
        ];
        if normalized != intent {
            candidates.push(normalized.clone());
            candidates.push(format!("protocol-{}", normalized));
            candidates.push(format!("primitive-{}", normalized));
        }

        for candidate in &candidates {
            if self.protocol_exists(candidate)? {
                return Ok(Some((CapabilityKind::Protocol, candidate.clone())));
            }
        }
        for candidate in &candidates {
            if self.registry.contains(candidate) {
                return Ok(Some((CapabilityKind::Primitive, candidate.clone())));
            }
        }
        Ok(None)
    }

    fn protocol_exists(&self, id: &str) -> Result<bool, ChoraError> {
        Ok(self
            .store
            .get_entity(id)?
            .map(|e| e.entity_type == "protocol")
            .unwrap_or(false))
    }

    /// The only execution entry point for all interfaces.
    pub fn dispatch(&self, intent: &str, inputs: Value, opts: DispatchOptions) -> DispatchResult {
        let inputs = match inputs {
            Value::Object(map) => map,
            Value::Null => JsonMap::new(),
            _ => {
                return DispatchResult::failure(
                    ErrorKind::InvalidInputs,
                    "inputs must be a JSON object",
                )
            }
        };

        let resolved = match self.resolve_intent(intent) {
            Ok(r) => r,
            Err(e) => return DispatchResult::failure(e.kind(), e.to_string()),
        };
        match resolved {
            None => DispatchResult::failure(
                ErrorKind::IntentNotFound,
                format!("could not resolve intent: {}", intent),
            ),
            Some((CapabilityKind::Protocol, id)) => self.dispatch_protocol(&id, inputs, opts),
            Some((CapabilityKind::Primitive, id)) => self.dispatch_primitive(&id, inputs, opts),
        }
    }

    fn make_context(&self, opts: &DispatchOptions) -> PrimitiveContext {
        PrimitiveContext {
            store: Arc::clone(&self.store),
            sink: opts
                .sink
                .clone()
                .unwrap_or_else(|| Arc::new(StdoutSink)),
            persona_id: opts.persona_id.clone(),
            vectorizer: self.vectorizer.clone(),
            deadline: opts.deadline,
        }
    }

    fn dispatch_primitive(
        &self,
        primitive_id: &str,
        inputs: JsonMap,
        opts: DispatchOptions,
    ) -> DispatchResult {
        let Some(record) = self.registry.get(primitive_id) else {
            return DispatchResult::failure(
                ErrorKind::PrimitiveNotFound,
                format!("primitive not registered: {}", primitive_id),
            );
        };
        if let Some(missing) = record
            .required
            .iter()
            .find(|field| !inputs.contains_key(&field.to_string()))
        {
            return DispatchResult::failure(
                ErrorKind::InvalidInputs,
                format!("{} requires input '{}'", primitive_id, missing),
            );
        }

        let ctx = self.make_context(&opts);
        match (record.handler)(&ctx, &inputs) {
            Response::Success(data) => DispatchResult::success(data, None),
            Response::Error { kind, message } => DispatchResult::failure(kind, message),
        }
    }

    /// Load a protocol entity and parse its body.
    pub fn load_protocol(&self, protocol_id: &str) -> Result<Option<ProtocolEntity>, ChoraError> {
        let Some(entity) = self.store.get_entity(protocol_id)? else {
            return Ok(None);
        };
        if entity.entity_type != "protocol" {
            return Ok(None);
        }
        let data: ProtocolData = serde_json::from_value(Value::Object(entity.data))
            .map_err(|e| ChoraError::InvalidData(format!("protocol {}: {}", protocol_id, e)))?;
        Ok(Some(ProtocolEntity {
            id: entity.id,
            data,
        }))
    }

    fn dispatch_protocol(
        &self,
        protocol_id: &str,
        inputs: JsonMap,
        opts: DispatchOptions,
    ) -> DispatchResult {
        let protocol = match self.load_protocol(protocol_id) {
            Ok(Some(p)) => p,
            Ok(None) => {
                return DispatchResult::failure(
                    ErrorKind::ProtocolNotFound,
                    format!("protocol not found: {}", protocol_id),
                )
            }
            Err(e) => return DispatchResult::failure(e.kind(), e.to_string()),
        };

        if let Some(missing) = required_inputs(&protocol)
            .iter()
            .find(|field| !inputs.contains_key(field.as_str()))
        {
            return DispatchResult::failure(
                ErrorKind::InvalidInputs,
                format!("{} requires input '{}'", protocol_id, missing),
            );
        }

        let state_id = opts
            .state_id
            .clone()
            .unwrap_or_else(|| format!("state-{}", new_event_id().to_lowercase()));
        let ctx = self.make_context(&opts);
        let loader = |id: &str| self.load_protocol(id);
        let vm = ProtocolVm::new(&self.registry, &loader, &ctx);
        let mut fuel = self.fuel;
        let outcome = vm.run(&protocol, inputs, &state_id, &mut fuel);

        if let Err(e) = self.store.save_state(&outcome.state) {
            eprintln!("failed to persist state {}: {}", state_id, e);
        }

        match outcome.state.status {
            StateStatus::Fulfilled => {
                DispatchResult::success(outcome.output, outcome.state.data.exit_node.clone())
            }
            _ => {
                let err = outcome.state.data.error.as_ref();
                DispatchResult::failure(
                    err.map(|e| ErrorKind::parse(&e.kind))
                        .unwrap_or(ErrorKind::ExecutionError),
                    err.map(|e| e.message.clone())
                        .unwrap_or_else(|| "protocol failed".to_string()),
                )
            }
        }
    }
}

/// Required inputs: the union of the declared interface and the
/// `inputs_schema.required` list.
fn required_inputs(protocol: &ProtocolEntity) -> Vec<String> {
    let mut required = protocol.data.interface.required.clone();
    if let Some(schema) = &protocol.data.inputs_schema {
        if let Some(list) = schema.get("required").and_then(Value::as_array) {
            for item in list {
                if let Some(name) = item.as_str() {
                    if !required.iter().any(|r| r == name) {
                        required.push(name.to_string());
                    }
                }
            }
        }
    }
    required
}
