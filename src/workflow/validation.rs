//! Static workflow validation.
//!
//! Runs before execution (and on demand from editors). Checks referential
//! integrity, the single-start invariant, handle declarations against static
//! and dynamic ports, required inputs, acyclicity outside while-loop
//! back-edges, and subflow resolution/nesting depth. Validation is pure:
//! validating the same workflow twice yields identical reports.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use super::graph::WorkflowGraph;
use super::ports::{self, PortDirection};
use super::schema::{WorkflowData, node_type};
use crate::extensions::ExtensionRegistry;
use crate::subflows::SubflowRegistry;

/// Default cap on subflow nesting.
pub const DEFAULT_MAX_SUBFLOW_DEPTH: usize = 10;

/// One finding from validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
}

impl ValidationIssue {
    #[must_use]
    pub fn workflow(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            node_id: None,
            edge_id: None,
        }
    }

    #[must_use]
    pub fn node(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            node_id: Some(node_id.into()),
            edge_id: None,
        }
    }

    #[must_use]
    pub fn edge(edge_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            node_id: None,
            edge_id: Some(edge_id.into()),
        }
    }
}

/// Errors block execution; warnings do not.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Flatten the error messages for embedding into an execution error.
    #[must_use]
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|issue| issue.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Statically check a workflow against the registered extensions.
#[must_use]
pub fn validate(
    workflow: &WorkflowData,
    extensions: &ExtensionRegistry,
    subflows: Option<&SubflowRegistry>,
) -> ValidationReport {
    validate_with_depth(workflow, extensions, subflows, DEFAULT_MAX_SUBFLOW_DEPTH)
}

/// [`validate`] with an explicit subflow nesting cap.
#[must_use]
pub fn validate_with_depth(
    workflow: &WorkflowData,
    extensions: &ExtensionRegistry,
    subflows: Option<&SubflowRegistry>,
    max_subflow_depth: usize,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    if workflow.meta.version != super::schema::WORKFLOW_VERSION {
        report.warnings.push(ValidationIssue::workflow(format!(
            "workflow version '{}' differs from supported '{}'",
            workflow.meta.version,
            super::schema::WORKFLOW_VERSION
        )));
    }

    check_node_ids(workflow, &mut report);
    check_start_invariant(workflow, &mut report);
    check_edges(workflow, extensions, &mut report);
    check_required_inputs(workflow, extensions, &mut report);
    check_cycles(workflow, &mut report);
    check_subflows(workflow, subflows, max_subflow_depth, &mut report);

    // Per-extension node checks (route lists, branch lists, data shapes).
    for node in &workflow.nodes {
        match extensions.get(&node.kind) {
            Some(ext) => report.errors.extend(ext.validate(node, workflow)),
            None => report.errors.push(ValidationIssue::node(
                &node.id,
                format!("unknown node type '{}'", node.kind),
            )),
        }
    }

    report
}

fn check_node_ids(workflow: &WorkflowData, report: &mut ValidationReport) {
    let mut seen = FxHashSet::default();
    for node in &workflow.nodes {
        if !seen.insert(node.id.as_str()) {
            report.errors.push(ValidationIssue::node(
                &node.id,
                format!("duplicate node id '{}'", node.id),
            ));
        }
    }
    let mut edge_ids = FxHashSet::default();
    for edge in &workflow.edges {
        if !edge_ids.insert(edge.id.as_str()) {
            report.warnings.push(ValidationIssue::edge(
                &edge.id,
                format!("duplicate edge id '{}'", edge.id),
            ));
        }
    }
}

fn check_start_invariant(workflow: &WorkflowData, report: &mut ValidationReport) {
    let starts = workflow.start_nodes();
    match starts.len() {
        0 => report
            .errors
            .push(ValidationIssue::workflow("workflow has no start node")),
        1 => {}
        n => report.errors.push(ValidationIssue::workflow(format!(
            "workflow has {n} start nodes; exactly one is required"
        ))),
    }
    for start in starts {
        if workflow.edges.iter().any(|e| e.target == start.id) {
            report.errors.push(ValidationIssue::node(
                &start.id,
                "start node must not have incoming edges",
            ));
        }
    }
}

fn check_edges(
    workflow: &WorkflowData,
    extensions: &ExtensionRegistry,
    report: &mut ValidationReport,
) {
    let node_ids: FxHashSet<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();
    for edge in &workflow.edges {
        if !node_ids.contains(edge.source.as_str()) {
            report.errors.push(ValidationIssue::edge(
                &edge.id,
                format!("edge source '{}' does not exist", edge.source),
            ));
            continue;
        }
        if !node_ids.contains(edge.target.as_str()) {
            report.errors.push(ValidationIssue::edge(
                &edge.id,
                format!("edge target '{}' does not exist", edge.target),
            ));
            continue;
        }

        let Some(source) = workflow.node(&edge.source) else {
            continue;
        };
        let Some(ext) = extensions.get(&source.kind) else {
            continue; // unknown type reported elsewhere
        };
        let mut outputs: FxHashSet<String> = ext
            .static_ports()
            .into_iter()
            .chain(ext.dynamic_ports(&source.data))
            .filter(|p| p.direction == PortDirection::Output)
            .map(|p| p.id)
            .collect();
        outputs.insert(ports::ERROR_HANDLE.to_string());

        match edge.source_handle.as_deref() {
            None => {
                if !outputs.contains(ports::DEFAULT_OUTPUT) {
                    report.errors.push(ValidationIssue::edge(
                        &edge.id,
                        format!(
                            "node '{}' ({}) has no default output; edge must name a handle",
                            edge.source, source.kind
                        ),
                    ));
                }
            }
            Some(handle) => {
                if !outputs.contains(handle) {
                    report.errors.push(ValidationIssue::edge(
                        &edge.id,
                        format!(
                            "source handle '{handle}' is not a declared port of node '{}'",
                            edge.source
                        ),
                    ));
                }
            }
        }
    }
}

fn check_required_inputs(
    workflow: &WorkflowData,
    extensions: &ExtensionRegistry,
    report: &mut ValidationReport,
) {
    for node in &workflow.nodes {
        let Some(ext) = extensions.get(&node.kind) else {
            continue;
        };
        for port in ext.static_ports() {
            if port.direction != PortDirection::Input || !port.required {
                continue;
            }
            let connected = workflow.edges.iter().any(|e| {
                e.target == node.id
                    && (e.target_handle.is_none() || e.target_handle.as_deref() == Some(&port.id))
            });
            if !connected {
                report.errors.push(ValidationIssue::node(
                    &node.id,
                    format!("required input '{}' has no incoming edge", port.id),
                ));
            }
        }
    }
}

/// Cycle detection over every edge except while-loop body returns.
fn check_cycles(workflow: &WorkflowData, report: &mut ValidationReport) {
    let graph = WorkflowGraph::build(workflow);

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: FxHashMap<String, Mark> = FxHashMap::default();
    for node in &workflow.nodes {
        if marks.contains_key(&node.id) {
            continue;
        }
        // Iterative DFS with an explicit stack of (node, next-child-index).
        let mut stack: Vec<(String, usize)> = vec![(node.id.clone(), 0)];
        marks.insert(node.id.clone(), Mark::Visiting);
        while let Some((current, child_idx)) = stack.pop() {
            let edges = graph.out_edges(&current);
            let mut advanced = false;
            for (offset, edge) in edges.iter().enumerate().skip(child_idx) {
                if graph.is_loop_back_edge(&current, &edge.target) {
                    continue;
                }
                match marks.get(&edge.target) {
                    Some(Mark::Visiting) => {
                        report.errors.push(ValidationIssue::node(
                            &edge.target,
                            format!(
                                "cycle detected through node '{}' outside a while-loop body",
                                edge.target
                            ),
                        ));
                    }
                    Some(Mark::Done) => {}
                    None => {
                        stack.push((current.clone(), offset + 1));
                        marks.insert(edge.target.clone(), Mark::Visiting);
                        stack.push((edge.target.clone(), 0));
                        advanced = true;
                        break;
                    }
                }
            }
            if !advanced {
                marks.insert(current, Mark::Done);
            }
        }
    }
}

fn check_subflows(
    workflow: &WorkflowData,
    subflows: Option<&SubflowRegistry>,
    max_depth: usize,
    report: &mut ValidationReport,
) {
    let referenced: Vec<(&str, String)> = workflow
        .nodes
        .iter()
        .filter(|n| n.kind == node_type::SUBFLOW)
        .filter_map(|n| {
            n.data
                .get("subflowId")
                .and_then(serde_json::Value::as_str)
                .map(|id| (n.id.as_str(), id.to_string()))
        })
        .collect();
    if referenced.is_empty() {
        return;
    }
    let Some(registry) = subflows else {
        for (node_id, subflow_id) in &referenced {
            report.warnings.push(ValidationIssue::node(
                *node_id,
                format!("subflow '{subflow_id}' cannot be resolved without a registry"),
            ));
        }
        return;
    };
    for (node_id, subflow_id) in &referenced {
        let Some(def) = registry.get(subflow_id) else {
            report.errors.push(ValidationIssue::node(
                *node_id,
                format!("subflow '{subflow_id}' is not registered"),
            ));
            continue;
        };
        let mut trail = FxHashSet::default();
        trail.insert(subflow_id.clone());
        let depth = nesting_depth(&def.workflow, registry, &mut trail);
        if depth > max_depth {
            report.errors.push(ValidationIssue::node(
                *node_id,
                format!("subflow '{subflow_id}' nests {depth} levels deep (limit {max_depth})"),
            ));
        }
    }
}

fn nesting_depth(
    workflow: &WorkflowData,
    registry: &SubflowRegistry,
    trail: &mut FxHashSet<String>,
) -> usize {
    let mut deepest = 1;
    for node in &workflow.nodes {
        if node.kind != node_type::SUBFLOW {
            continue;
        }
        let Some(id) = node.data.get("subflowId").and_then(serde_json::Value::as_str) else {
            continue;
        };
        if !trail.insert(id.to_string()) {
            // Recursive subflow reference; treated as unbounded depth.
            return usize::MAX;
        }
        if let Some(def) = registry.get(id) {
            let nested = nesting_depth(&def.workflow, registry, trail);
            deepest = deepest.max(nested.saturating_add(1));
        }
        trail.remove(id);
    }
    deepest
}
