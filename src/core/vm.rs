//! The protocol virtual machine.
//!
//! Walks a protocol's node graph: START/MERGE pass through, SET writes
//! computed bindings, CALL invokes a primitive (or a nested protocol),
//! BRANCH routes on a pure predicate, RETURN fulfills the state and
//! records the exit node. Every step lands in the trace.
//!
//! Two guards bound malformed graphs: a fuel budget shared across nested
//! protocol calls, and a cycle check that only admits a node revisit when
//! the most recent BRANCH decision differs from the one in effect at its
//! previous visit.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::core::context::PrimitiveContext;
use crate::core::error::ChoraError;
use crate::core::model::{
    ConditionOp, JsonMap, NodeKind, Predicate, ProtocolEntity, ProtocolNode, Response, StateData,
    StateEntity, StateError, StateStatus,
};
use crate::core::registry::PrimitiveRegistry;

/// Default step budget for one dispatch, shared with nested protocols.
pub const DEFAULT_FUEL: u32 = 256;

pub type ProtocolLoader<'a> = dyn Fn(&str) -> Result<Option<ProtocolEntity>, ChoraError> + 'a;

pub struct ProtocolVm<'a> {
    registry: &'a PrimitiveRegistry,
    loader: &'a ProtocolLoader<'a>,
    ctx: &'a PrimitiveContext,
}

/// Final state plus the resolved RETURN template.
pub struct VmOutcome {
    pub state: StateEntity,
    pub output: Value,
}

impl<'a> ProtocolVm<'a> {
    pub fn new(
        registry: &'a PrimitiveRegistry,
        loader: &'a ProtocolLoader<'a>,
        ctx: &'a PrimitiveContext,
    ) -> Self {
        ProtocolVm {
            registry,
            loader,
            ctx,
        }
    }

    /// Run a protocol to a terminal state.
    pub fn run(
        &self,
        protocol: &ProtocolEntity,
        inputs: JsonMap,
        state_id: &str,
        fuel: &mut u32,
    ) -> VmOutcome {
        let mut bindings = JsonMap::new();
        bindings.insert("inputs".to_string(), Value::Object(inputs));
        let mut state = StateEntity {
            id: state_id.to_string(),
            status: StateStatus::Running,
            data: StateData {
                protocol_id: protocol.id.clone(),
                current_node: Some(protocol.data.graph.start.clone()),
                exit_node: None,
                bindings,
                trace: Vec::new(),
                error: None,
            },
        };

        let nodes: HashMap<&str, &ProtocolNode> = protocol
            .data
            .graph
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n))
            .collect();

        let start_count = protocol
            .data
            .graph
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Start)
            .count();
        if start_count != 1 || !nodes.contains_key(protocol.data.graph.start.as_str()) {
            return self.fail(state, "execution_error", "graph must have exactly one START node");
        }

        // (node -> branch decision in effect at its last visit)
        let mut visited: HashMap<String, Option<(String, String)>> = HashMap::new();
        let mut last_decision: Option<(String, String)> = None;

        loop {
            let Some(cursor) = state.data.current_node.clone() else {
                state.status = StateStatus::Fulfilled;
                break;
            };
            if self.ctx.deadline_exceeded() {
                return self.fail(state, "execution_error", "timeout");
            }
            if *fuel == 0 {
                return self.fail(state, "execution_error", "step_budget_exhausted");
            }
            *fuel -= 1;

            let Some(node) = nodes.get(cursor.as_str()).copied() else {
                return self.fail(
                    state,
                    "execution_error",
                    &format!("edge leads to unknown node {}", cursor),
                );
            };

            state.data.trace.push(cursor.clone());
            if let Some(prior) = visited.get(&cursor) {
                if *prior == last_decision {
                    return self.fail(state, "execution_error", "cycle_detected");
                }
            }
            visited.insert(cursor.clone(), last_decision.clone());

            match node.kind {
                NodeKind::Start | NodeKind::Merge => {
                    self.advance(protocol, &mut state, &cursor);
                }
                NodeKind::Set => {
                    for (name, template) in &node.bindings {
                        let value = resolve_value(template, &state.data.bindings);
                        state.data.bindings.insert(name.clone(), value);
                    }
                    self.advance(protocol, &mut state, &cursor);
                }
                NodeKind::Call => {
                    let Some(call_ref) = node.call_ref.as_deref() else {
                        return self.fail(
                            state,
                            "execution_error",
                            &format!("CALL node {} has no ref", cursor),
                        );
                    };
                    let args = resolve_map(&node.inputs, &state.data.bindings);
                    let binding_name = node.out.clone().unwrap_or_else(|| cursor.clone());
                    let parent_id = state.id.clone();

                    let result = if call_ref.starts_with("protocol-") {
                        match self.call_protocol(call_ref, &args, &parent_id, fuel) {
                            Ok(value) => value,
                            Err((kind, message)) => return self.fail(state, &kind, &message),
                        }
                    } else {
                        match self.call_primitive(call_ref, &args) {
                            Ok(value) => value,
                            Err((kind, message)) => return self.fail(state, &kind, &message),
                        }
                    };

                    state.data.bindings.insert(binding_name, result);
                    self.advance(protocol, &mut state, &cursor);
                }
                NodeKind::Branch => {
                    let Some(predicate) = &node.predicate else {
                        return self.fail(
                            state,
                            "execution_error",
                            &format!("BRANCH node {} has no predicate", cursor),
                        );
                    };
                    let decision = Value::Bool(evaluate_predicate(predicate, &state.data.bindings));

                    let candidates: Vec<_> = protocol
                        .data
                        .graph
                        .edges
                        .iter()
                        .filter(|e| e.from == cursor)
                        .collect();
                    let chosen = candidates
                        .iter()
                        .find(|e| e.label.as_ref() == Some(&decision))
                        .or_else(|| candidates.iter().find(|e| e.default));
                    match chosen {
                        Some(edge) => {
                            let label = edge
                                .label
                                .as_ref()
                                .map(|l| l.to_string())
                                .unwrap_or_else(|| "default".to_string());
                            last_decision = Some((cursor.clone(), label));
                            state.data.current_node = Some(edge.to.clone());
                        }
                        None => return self.fail(state, "execution_error", "no_branch"),
                    }
                }
                NodeKind::Return => {
                    state.status = StateStatus::Fulfilled;
                    state.data.exit_node = Some(cursor.clone());
                    state.data.current_node = None;
                }
            }

            if state.status != StateStatus::Running {
                break;
            }
        }

        let output = extract_output(protocol, &state);
        VmOutcome { state, output }
    }

    fn call_primitive(
        &self,
        primitive_id: &str,
        args: &JsonMap,
    ) -> Result<Value, (String, String)> {
        let Some(record) = self.registry.get(primitive_id) else {
            return Err((
                "primitive_not_found".to_string(),
                format!("primitive {} is not registered", primitive_id),
            ));
        };
        match (record.handler)(self.ctx, args) {
            Response::Success(data) => Ok(data),
            Response::Error { kind, message } => Err((kind.as_str().to_string(), message)),
        }
    }

    fn call_protocol(
        &self,
        protocol_id: &str,
        args: &JsonMap,
        parent_state_id: &str,
        fuel: &mut u32,
    ) -> Result<Value, (String, String)> {
        let child = match (self.loader)(protocol_id) {
            Ok(Some(p)) => p,
            Ok(None) => {
                return Err((
                    "protocol_not_found".to_string(),
                    format!("protocol {} not found", protocol_id),
                ))
            }
            Err(e) => return Err((e.kind().as_str().to_string(), e.to_string())),
        };
        let child_state_id = format!("{}.{}", parent_state_id, protocol_id);
        let outcome = self.run(&child, args.clone(), &child_state_id, fuel);
        match outcome.state.status {
            StateStatus::Fulfilled => Ok(outcome.output),
            _ => {
                let err = outcome.state.data.error.unwrap_or(StateError {
                    kind: "execution_error".to_string(),
                    message: "nested protocol failed".to_string(),
                });
                Err((err.kind, err.message))
            }
        }
    }

    fn advance(&self, protocol: &ProtocolEntity, state: &mut StateEntity, cursor: &str) {
        let candidates: Vec<_> = protocol
            .data
            .graph
            .edges
            .iter()
            .filter(|e| e.from == cursor)
            .collect();
        // Sequential flow first, then the default edge; no edge ends the run.
        let next = candidates
            .iter()
            .find(|e| e.label.is_none() && !e.default)
            .or_else(|| candidates.iter().find(|e| e.default));
        match next {
            Some(edge) => state.data.current_node = Some(edge.to.clone()),
            None => {
                state.status = StateStatus::Fulfilled;
                state.data.current_node = None;
            }
        }
    }

    fn fail(&self, mut state: StateEntity, kind: &str, message: &str) -> VmOutcome {
        state.status = StateStatus::Failed;
        state.data.current_node = None;
        state.data.error = Some(StateError {
            kind: kind.to_string(),
            message: message.to_string(),
        });
        VmOutcome {
            state,
            output: Value::Null,
        }
    }
}

/// Resolve the RETURN template recorded by `exit_node` against bindings.
pub fn extract_output(protocol: &ProtocolEntity, state: &StateEntity) -> Value {
    let Some(exit) = &state.data.exit_node else {
        return Value::Object(Map::new());
    };
    let Some(node) = protocol.data.graph.nodes.iter().find(|n| &n.id == exit) else {
        return Value::Object(Map::new());
    };
    Value::Object(resolve_map(&node.outputs, &state.data.bindings))
}

// ===== Template resolution =====

fn interpolation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{(\$\.[^}]+)\}").expect("valid pattern"))
}

/// Resolve a template value against bindings.
///
/// - `"$.a.b"` is a pointer into bindings (dot path, numeric list index)
/// - `"text {$.a.b} text"` interpolates resolved pointers into the string
/// - maps and lists resolve recursively; everything else passes through
pub fn resolve_value(template: &Value, bindings: &JsonMap) -> Value {
    match template {
        Value::Object(map) => Value::Object(resolve_map(map, bindings)),
        Value::Array(items) => Value::Array(
            items.iter().map(|item| resolve_value(item, bindings)).collect(),
        ),
        Value::String(s) => {
            if let Some(path) = s.strip_prefix("$.") {
                return lookup_path(path, bindings);
            }
            if s.contains("{$.") {
                let rendered = interpolation_pattern().replace_all(s, |caps: &regex::Captures| {
                    match lookup_path(&caps[1][2..], bindings) {
                        Value::Null => String::new(),
                        Value::String(s) => s,
                        other => other.to_string(),
                    }
                });
                return Value::String(rendered.into_owned());
            }
            template.clone()
        }
        other => other.clone(),
    }
}

pub fn resolve_map(template: &JsonMap, bindings: &JsonMap) -> JsonMap {
    template
        .iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, bindings)))
        .collect()
}

fn lookup_path(path: &str, bindings: &JsonMap) -> Value {
    let mut current = Value::Object(bindings.clone());
    for segment in path.split('.') {
        current = match &current {
            Value::Object(map) => match map.get(segment) {
                Some(v) => v.clone(),
                None => return Value::Null,
            },
            Value::Array(items) => match segment.parse::<usize>() {
                Ok(idx) if idx < items.len() => items[idx].clone(),
                _ => return Value::Null,
            },
            _ => return Value::Null,
        };
    }
    current
}

/// Evaluate a BRANCH predicate against bindings. Pure; no side effects.
pub fn evaluate_predicate(predicate: &Predicate, bindings: &JsonMap) -> bool {
    let actual = lookup_path(predicate.path.trim_start_matches("$."), bindings);
    let expected = predicate.value.clone().unwrap_or(Value::Null);
    match predicate.op {
        ConditionOp::Eq => actual == expected,
        ConditionOp::Neq => actual != expected,
        ConditionOp::Gt => compare_numbers(&actual, &expected).map(|o| o.is_gt()).unwrap_or(false),
        ConditionOp::Lt => compare_numbers(&actual, &expected).map(|o| o.is_lt()).unwrap_or(false),
        ConditionOp::Contains => match (&actual, &expected) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
            (Value::Array(items), needle) => items.contains(needle),
            _ => false,
        },
        ConditionOp::Empty => match &actual {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            Value::Bool(b) => !b,
            Value::Number(_) => false,
        },
    }
}

fn compare_numbers(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().partial_cmp(&y.as_f64())
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bindings() -> JsonMap {
        json!({
            "inputs": { "x": 3, "name": "loom", "tags": ["a", "b"] },
            "step": { "rows": [ { "id": "first" } ] }
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn pointers_traverse_maps_and_lists() {
        let b = bindings();
        assert_eq!(resolve_value(&json!("$.inputs.x"), &b), json!(3));
        assert_eq!(resolve_value(&json!("$.step.rows.0.id"), &b), json!("first"));
        assert_eq!(resolve_value(&json!("$.inputs.missing"), &b), Value::Null);
    }

    #[test]
    fn interpolation_renders_into_strings() {
        let b = bindings();
        assert_eq!(
            resolve_value(&json!("hello {$.inputs.name}/{$.inputs.x}"), &b),
            json!("hello loom/3")
        );
    }

    #[test]
    fn predicates_cover_the_op_set() {
        let b = bindings();
        let pred = |op, path: &str, value| Predicate {
            op,
            path: path.to_string(),
            value,
        };
        assert!(evaluate_predicate(&pred(ConditionOp::Gt, "$.inputs.x", Some(json!(0))), &b));
        assert!(!evaluate_predicate(&pred(ConditionOp::Lt, "$.inputs.x", Some(json!(0))), &b));
        assert!(evaluate_predicate(
            &pred(ConditionOp::Contains, "$.inputs.tags", Some(json!("a"))),
            &b
        ));
        assert!(evaluate_predicate(&pred(ConditionOp::Empty, "$.inputs.nope", None), &b));
        assert!(evaluate_predicate(
            &pred(ConditionOp::Eq, "$.inputs.name", Some(json!("loom"))),
            &b
        ));
    }
}
