//! Node-type extensions: ports, validation, and executors.
//!
//! An extension describes one node type. The registry maps type names to
//! extensions; the validator consults their port declarations and the
//! scheduler dispatches execution through them. Dispatch is always a
//! registry lookup, never type conditionals in the scheduler.

pub mod agent;
pub mod memory;
pub mod output;
pub mod parallel;
pub mod router;
pub mod start;
pub mod subflow;
pub mod tool;
pub mod while_loop;

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::errors::{ErrorMode, ExecutionError};
use crate::runtime::ExecutionContext;
use crate::workflow::{PortDefinition, ValidationIssue, WorkflowData, WorkflowNode};

pub use agent::AgentExtension;
pub use memory::MemoryExtension;
pub use output::OutputExtension;
pub use parallel::ParallelExtension;
pub use router::RouterExtension;
pub use start::StartExtension;
pub use subflow::SubflowExtension;
pub use tool::ToolExtension;
pub use while_loop::{EvaluatorInput, LoopEvaluator, WhileLoopExtension};

/// What one node execution produced: its output string and the node ids the
/// scheduler should enqueue next.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeExecution {
    pub output: String,
    pub next_nodes: Vec<String>,
}

impl NodeExecution {
    #[must_use]
    pub fn new(output: impl Into<String>, next_nodes: Vec<String>) -> Self {
        Self {
            output: output.into(),
            next_nodes,
        }
    }

    /// Terminal execution: output with nothing scheduled after it.
    #[must_use]
    pub fn terminal(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            next_nodes: Vec::new(),
        }
    }
}

/// One registered node type.
#[async_trait]
pub trait NodeExtension: Send + Sync {
    /// The `type` string this extension answers to.
    fn type_name(&self) -> &'static str;

    /// Ports declared statically by this node type.
    fn static_ports(&self) -> Vec<PortDefinition>;

    /// Ports derived from a node's data (router routes, parallel branches).
    fn dynamic_ports(&self, _data: &Value) -> Vec<PortDefinition> {
        Vec::new()
    }

    /// Node-level validation beyond the structural checks.
    fn validate(&self, _node: &WorkflowNode, _workflow: &WorkflowData) -> Vec<ValidationIssue> {
        Vec::new()
    }

    /// Error mode applied when the node data carries no explicit policy.
    fn default_error_mode(&self) -> ErrorMode {
        ErrorMode::Stop
    }

    /// Execute the node against the current input.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: &str,
        node: &WorkflowNode,
    ) -> Result<NodeExecution, ExecutionError>;
}

/// Process-scoped map from node-type name to extension.
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    extensions: FxHashMap<String, Arc<dyn NodeExtension>>,
}

impl ExtensionRegistry {
    /// An empty registry. Most embedders want [`with_builtins`](Self::with_builtins).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the nine built-in node types.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(StartExtension);
        registry.register(AgentExtension);
        registry.register(RouterExtension);
        registry.register(ParallelExtension);
        registry.register(WhileLoopExtension);
        registry.register(SubflowExtension);
        registry.register(MemoryExtension);
        registry.register(ToolExtension);
        registry.register(OutputExtension);
        registry
    }

    /// Register an extension, replacing any existing one of the same name.
    pub fn register<E: NodeExtension + 'static>(&mut self, extension: E) {
        self.extensions
            .insert(extension.type_name().to_string(), Arc::new(extension));
    }

    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<Arc<dyn NodeExtension>> {
        self.extensions.get(type_name).cloned()
    }

    #[must_use]
    pub fn has(&self, type_name: &str) -> bool {
        self.extensions.contains_key(type_name)
    }

    /// Registered type names, sorted for determinism.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.extensions.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("types", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::node_type;

    #[test]
    fn test_builtins_registered() {
        let registry = ExtensionRegistry::with_builtins();
        for kind in [
            node_type::START,
            node_type::AGENT,
            node_type::ROUTER,
            node_type::PARALLEL,
            node_type::WHILE_LOOP,
            node_type::SUBFLOW,
            node_type::MEMORY,
            node_type::TOOL,
            node_type::OUTPUT,
        ] {
            assert!(registry.has(kind), "missing builtin '{kind}'");
        }
        assert_eq!(registry.list().len(), 9);
    }
}
