//! Typed data model: entities, bonds, protocol graphs, VM state, and the
//! standard response envelope.
//!
//! Entity `data` payloads are intentionally open (`serde_json` maps); the
//! kernel models strictly only what it executes, protocol graphs and VM
//! states. Everything else is validated at the boundary and carried opaque.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::core::error::{ChoraError, ErrorKind};

pub type JsonMap = Map<String, Value>;

// ===== Entities & bonds =====

/// A live row of the `entities` relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub data: JsonMap,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Entity {
    pub fn title(&self) -> String {
        self.data
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(&self.id)
            .to_string()
    }
}

/// A directed typed edge of the `bonds` relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bond {
    pub id: String,
    pub verb: String,
    pub from_id: String,
    pub to_id: String,
    pub confidence: f64,
    pub status: String,
    pub metadata: JsonMap,
}

/// Filter for `Store::query_entities`.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub entity_type: Option<String>,
    pub status: Option<String>,
    /// Equality predicates on `data` fields, as (JSON path, value).
    pub data_eq: Vec<(String, Value)>,
    /// Only entities updated at or after this RFC 3339 timestamp.
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// Counterpart summary inside a constellation.
#[derive(Debug, Clone, Serialize)]
pub struct EntitySummary {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConstellationEdge {
    pub bond_id: String,
    pub counterpart: EntitySummary,
    pub confidence: f64,
    pub status: String,
}

/// The 1-hop bond neighborhood around a focal entity, grouped by verb.
#[derive(Debug, Clone, Serialize)]
pub struct Constellation {
    pub entity_id: String,
    pub outgoing: BTreeMap<String, Vec<ConstellationEdge>>,
    pub incoming: BTreeMap<String, Vec<ConstellationEdge>>,
}

// ===== Protocol graphs =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeKind {
    Start,
    Call,
    Branch,
    Merge,
    Return,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOp {
    Eq,
    Neq,
    Gt,
    Lt,
    Contains,
    Empty,
}

/// Pure predicate over bindings, evaluated at BRANCH nodes and edge guards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Predicate {
    pub op: ConditionOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolNode {
    pub id: String,
    pub kind: NodeKind,
    /// Primitive or protocol id, for CALL nodes.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub call_ref: Option<String>,
    /// Argument template rendered against bindings, for CALL nodes.
    #[serde(default)]
    pub inputs: JsonMap,
    /// Binding name the CALL response lands in (defaults to the node id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,
    /// Branch predicate, for BRANCH nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<Predicate>,
    /// Computed bindings, for SET nodes.
    #[serde(default)]
    pub bindings: JsonMap,
    /// Output template, for RETURN nodes.
    #[serde(default)]
    pub outputs: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolEdge {
    pub from: String,
    pub to: String,
    /// Label matched against the BRANCH predicate value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Value>,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolGraph {
    pub start: String,
    pub nodes: Vec<ProtocolNode>,
    pub edges: Vec<ProtocolEdge>,
}

/// Declared capability interface: required and optional input names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterfaceSpec {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub interface: InterfaceSpec,
    /// Optional JSON-schema-shaped input contract; `required` is enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs_schema: Option<Value>,
    pub graph: ProtocolGraph,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolEntity {
    pub id: String,
    pub data: ProtocolData,
}

// ===== VM state =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateStatus {
    Pending,
    Running,
    Fulfilled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateData {
    pub protocol_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_node: Option<String>,
    #[serde(default)]
    pub bindings: JsonMap,
    #[serde(default)]
    pub trace: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StateError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntity {
    pub id: String,
    pub status: StateStatus,
    pub data: StateData,
}

// ===== Response envelope =====

/// The standard response envelope every primitive produces.
#[derive(Debug, Clone)]
pub enum Response {
    Success(Value),
    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Response::Success(data)
    }

    pub fn err(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }

    pub fn to_value(&self) -> Value {
        match self {
            Response::Success(data) => serde_json::json!({
                "status": "success",
                "data": data,
            }),
            Response::Error { kind, message } => serde_json::json!({
                "status": "error",
                "error_kind": kind.as_str(),
                "error_message": message,
            }),
        }
    }
}

impl From<ChoraError> for Response {
    fn from(err: ChoraError) -> Self {
        Response::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl<T: Serialize> From<Result<T, ChoraError>> for Response {
    fn from(res: Result<T, ChoraError>) -> Self {
        match res {
            Ok(v) => Response::Success(serde_json::to_value(v).unwrap_or(Value::Null)),
            Err(e) => e.into(),
        }
    }
}

// ===== Dispatch =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Protocol,
    Primitive,
}

/// A discoverable capability: a protocol entity or a registered primitive.
#[derive(Debug, Clone, Serialize)]
pub struct Capability {
    pub id: String,
    pub kind: CapabilityKind,
    pub description: String,
    pub interface: InterfaceSpec,
}

/// Result of `Engine::dispatch`.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub ok: bool,
    pub data: Value,
    pub exit_node: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl DispatchResult {
    pub fn success(data: Value, exit_node: Option<String>) -> Self {
        DispatchResult {
            ok: true,
            data,
            exit_node,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        DispatchResult {
            ok: false,
            data: Value::Null,
            exit_node: None,
            error_kind: Some(kind),
            error_message: Some(message.into()),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut out = serde_json::json!({ "ok": self.ok, "data": self.data });
        let obj = out.as_object_mut().expect("envelope is an object");
        if let Some(node) = &self.exit_node {
            obj.insert("exit_node".into(), Value::String(node.clone()));
        }
        if !self.ok {
            obj.insert(
                "error_kind".into(),
                Value::String(
                    self.error_kind
                        .map(|k| k.as_str().to_string())
                        .unwrap_or_else(|| "execution_error".into()),
                ),
            );
            obj.insert(
                "error_message".into(),
                Value::String(self.error_message.clone().unwrap_or_default()),
            );
        }
        out
    }
}
