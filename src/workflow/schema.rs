//! Wire format for workflow definitions.
//!
//! The format is stable and versioned by `meta.version`. Editors emit it,
//! storage adapters persist it, and the engine parses it back without loss:
//! `parse(serialize(w))` deep-equals `w` for any valid workflow.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire-format version this crate reads and writes.
pub const WORKFLOW_VERSION: &str = "2.0.0";

/// Built-in node type names.
pub mod node_type {
    pub const START: &str = "start";
    pub const AGENT: &str = "agent";
    pub const ROUTER: &str = "router";
    pub const PARALLEL: &str = "parallel";
    pub const WHILE_LOOP: &str = "whileLoop";
    pub const SUBFLOW: &str = "subflow";
    pub const MEMORY: &str = "memory";
    pub const TOOL: &str = "tool";
    pub const OUTPUT: &str = "output";
}

/// Workflow metadata block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMeta {
    pub version: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl WorkflowMeta {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: WORKFLOW_VERSION.to_string(),
            name: name.into(),
            description: None,
        }
    }
}

/// Canvas coordinates; carried through serialization, ignored by the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One node of the graph. `data` stays raw here; the extension registered
/// for `kind` owns its typed shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: Value,
}

impl WorkflowNode {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            position: Position::default(),
            data,
        }
    }

    /// The user-visible label, when the node data carries one.
    #[must_use]
    pub fn label(&self) -> Option<String> {
        self.data
            .get("label")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// One directed edge. `source_handle` names the output port emitting the
/// edge; absent means the node's single default output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WorkflowEdge {
    #[must_use]
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
            label: None,
            data: None,
        }
    }

    #[must_use]
    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// A complete workflow definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowData {
    pub meta: WorkflowMeta,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowData {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: WorkflowMeta::new(name),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Parse a workflow from its JSON wire form.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The nodes with `type = "start"`, in declaration order.
    #[must_use]
    pub fn start_nodes(&self) -> Vec<&WorkflowNode> {
        self.nodes
            .iter()
            .filter(|n| n.kind == node_type::START)
            .collect()
    }

    /// Builder: append a node.
    #[must_use]
    pub fn with_node(mut self, node: WorkflowNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Builder: append an edge.
    #[must_use]
    pub fn with_edge(mut self, edge: WorkflowEdge) -> Self {
        self.edges.push(edge);
        self
    }
}
