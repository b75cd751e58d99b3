//! Start node: the execution entry point.
//!
//! Passes the input text through unchanged and fans out to every child.
//! Attachments are already exposed on the execution context for downstream
//! agents.

use async_trait::async_trait;

use crate::errors::ExecutionError;
use crate::runtime::ExecutionContext;
use crate::workflow::{PortDefinition, node_type};

use super::{NodeExecution, NodeExtension};

pub struct StartExtension;

#[async_trait]
impl NodeExtension for StartExtension {
    fn type_name(&self) -> &'static str {
        node_type::START
    }

    fn static_ports(&self) -> Vec<PortDefinition> {
        vec![PortDefinition::default_output().multiple_port()]
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: &str,
        node: &crate::workflow::WorkflowNode,
    ) -> Result<NodeExecution, ExecutionError> {
        Ok(NodeExecution::new(
            input,
            ctx.graph.all_children(&node.id),
        ))
    }
}
