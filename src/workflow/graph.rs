//! Adjacency structures over a workflow definition.
//!
//! Built once per execution: port-keyed child lookup in edge-declaration
//! order, parent lists for the readiness gate, and the set of legal
//! back-edges returning from a while-loop body into its loop node.

use rustc_hash::{FxHashMap, FxHashSet};

use super::ports;
use super::schema::{WorkflowData, WorkflowNode, node_type};

/// One outgoing edge as seen from its source node.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeRef {
    pub edge_id: String,
    pub handle: Option<String>,
    pub target: String,
}

/// Precomputed adjacency for one workflow.
#[derive(Clone, Debug, Default)]
pub struct WorkflowGraph {
    nodes: FxHashMap<String, WorkflowNode>,
    /// Outgoing edges per node, in edge-declaration order.
    out_edges: FxHashMap<String, Vec<EdgeRef>>,
    /// Distinct parent node ids per node, in edge-declaration order.
    parents: FxHashMap<String, Vec<String>>,
    /// `(source, target)` pairs returning from a loop body into its loop node.
    loop_back_edges: FxHashSet<(String, String)>,
    start_id: Option<String>,
}

impl WorkflowGraph {
    /// Build adjacency for a workflow definition.
    #[must_use]
    pub fn build(workflow: &WorkflowData) -> Self {
        let mut graph = Self {
            start_id: workflow.start_nodes().first().map(|n| n.id.clone()),
            ..Default::default()
        };
        for node in &workflow.nodes {
            graph.nodes.insert(node.id.clone(), node.clone());
        }
        for edge in &workflow.edges {
            graph
                .out_edges
                .entry(edge.source.clone())
                .or_default()
                .push(EdgeRef {
                    edge_id: edge.id.clone(),
                    handle: edge.source_handle.clone(),
                    target: edge.target.clone(),
                });
            let parents = graph.parents.entry(edge.target.clone()).or_default();
            if !parents.contains(&edge.source) {
                parents.push(edge.source.clone());
            }
        }
        graph.loop_back_edges = graph.compute_loop_back_edges();
        graph
    }

    fn compute_loop_back_edges(&self) -> FxHashSet<(String, String)> {
        let mut back = FxHashSet::default();
        for node in self.nodes.values() {
            if node.kind != node_type::WHILE_LOOP {
                continue;
            }
            let body_entries = self.children_on(&node.id, Some(ports::BODY_HANDLE));
            let body = self.reachable_from(&body_entries, Some(&node.id));
            for source in &body {
                let returns = self
                    .out_edges
                    .get(source)
                    .map(|edges| edges.iter().any(|e| e.target == node.id))
                    .unwrap_or(false);
                if returns {
                    back.insert((source.clone(), node.id.clone()));
                }
            }
        }
        back
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The workflow's start node id, when one exists.
    #[must_use]
    pub fn start_id(&self) -> Option<&str> {
        self.start_id.as_deref()
    }

    /// All outgoing edges of a node, in declaration order.
    #[must_use]
    pub fn out_edges(&self, id: &str) -> &[EdgeRef] {
        self.out_edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Targets reached from `id` via the given handle, in declaration order.
    /// `None` selects edges without a source handle (the default output).
    #[must_use]
    pub fn children_on(&self, id: &str, handle: Option<&str>) -> Vec<String> {
        self.out_edges(id)
            .iter()
            .filter(|e| e.handle.as_deref() == handle)
            .map(|e| e.target.clone())
            .collect()
    }

    /// Targets on the default output handle.
    #[must_use]
    pub fn default_children(&self, id: &str) -> Vec<String> {
        self.children_on(id, None)
    }

    /// All distinct targets of a node regardless of handle, in declaration
    /// order.
    #[must_use]
    pub fn all_children(&self, id: &str) -> Vec<String> {
        let mut seen = FxHashSet::default();
        self.out_edges(id)
            .iter()
            .filter(|e| seen.insert(e.target.clone()))
            .map(|e| e.target.clone())
            .collect()
    }

    /// Targets on the universal error handle.
    #[must_use]
    pub fn error_children(&self, id: &str) -> Vec<String> {
        self.children_on(id, Some(ports::ERROR_HANDLE))
    }

    #[must_use]
    pub fn parents(&self, id: &str) -> &[String] {
        self.parents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `source -> target` is a legal back-edge from a loop body into
    /// its while-loop node.
    #[must_use]
    pub fn is_loop_back_edge(&self, source: &str, target: &str) -> bool {
        self.loop_back_edges
            .contains(&(source.to_string(), target.to_string()))
    }

    /// Node ids reachable from `entries` (inclusive) following all handles,
    /// without traversing into `boundary`.
    #[must_use]
    pub fn reachable_from(&self, entries: &[String], boundary: Option<&str>) -> FxHashSet<String> {
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut stack: Vec<String> = entries
            .iter()
            .filter(|id| Some(id.as_str()) != boundary)
            .cloned()
            .collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            for edge in self.out_edges(&id) {
                if Some(edge.target.as_str()) == boundary {
                    continue;
                }
                if !seen.contains(&edge.target) {
                    stack.push(edge.target.clone());
                }
            }
        }
        seen
    }

    /// Whether tokens produced by this node are terminal-workflow tokens:
    /// the node is an output node, feeds one directly, or has no default
    /// children at all.
    #[must_use]
    pub fn feeds_terminal(&self, id: &str) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        if node.kind == node_type::OUTPUT {
            return true;
        }
        let children = self.default_children(id);
        if children.is_empty() {
            return true;
        }
        children.iter().any(|child| {
            self.nodes
                .get(child)
                .map(|n| n.kind == node_type::OUTPUT)
                .unwrap_or(false)
        })
    }
}
