//! Workflow data model: wire schema, ports, adjacency, and validation.
//!
//! A workflow is a user-authored directed graph of typed nodes plus edges,
//! serialized as versioned JSON. Node payloads stay schema-free at this
//! layer ([`serde_json::Value`]); each registered extension owns the typed
//! shape of its node data and decodes it at validation/execution time.

pub mod graph;
pub mod ports;
pub mod schema;
pub mod validation;

pub use graph::{EdgeRef, WorkflowGraph};
pub use ports::{ERROR_HANDLE, PortDefinition, PortDirection};
pub use schema::{
    Position, WORKFLOW_VERSION, WorkflowData, WorkflowEdge, WorkflowMeta, WorkflowNode, node_type,
};
pub use validation::{ValidationIssue, ValidationReport, validate};
