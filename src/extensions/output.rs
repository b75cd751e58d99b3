//! Output node: the terminal sink of a workflow.
//!
//! Passes its input through as the workflow's final output. Tokens that fed
//! this node were already surfaced as workflow tokens by the producing
//! agent; the node itself performs no inference.

use async_trait::async_trait;

use crate::errors::ExecutionError;
use crate::runtime::ExecutionContext;
use crate::workflow::{PortDefinition, node_type};

use super::{NodeExecution, NodeExtension};

pub struct OutputExtension;

#[async_trait]
impl NodeExtension for OutputExtension {
    fn type_name(&self) -> &'static str {
        node_type::OUTPUT
    }

    fn static_ports(&self) -> Vec<PortDefinition> {
        vec![PortDefinition::default_input()]
    }

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        input: &str,
        _node: &crate::workflow::WorkflowNode,
    ) -> Result<NodeExecution, ExecutionError> {
        Ok(NodeExecution::terminal(input))
    }
}
