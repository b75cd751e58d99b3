//! The execution scheduler: BFS with parent-readiness gating.
//!
//! One cooperative async loop drives the graph from the start node (or a
//! resume point) until a terminal node executes, the queue drains, an
//! unrecoverable error stops the run, or cancellation fires. The parallel,
//! while-loop, and subflow executors recurse through
//! [`execute_subgraph`], which runs the same loop over a scoped region of
//! the graph with its own iteration cap.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::instrument;

use crate::compaction::HeuristicTokenCounter;
use crate::errors::{ErrorCode, ErrorHandling, ErrorMode, ExecutionError, NodeErrorPayload};
use crate::event_bus::{Event, EventBus};
use crate::extensions::ExtensionRegistry;
use crate::message::ExecutionInput;
use crate::provider::ChatProvider;
use crate::retry::{RetryAttempt, RetryPolicy};
use crate::session::Session;
use crate::utils::ids;
use crate::workflow::{ValidationReport, WorkflowData, WorkflowGraph, validation};

use super::context::{ExecutionContext, ExecutionServices};
use super::options::ExecutionOptions;
use super::result::ExecutionResult;

/// What one BFS run over a (sub)graph produced.
#[derive(Clone, Debug, Default)]
pub(crate) struct SubgraphOutcome {
    /// Output of the last node that executed.
    pub last_output: String,
    /// The last node that executed.
    pub last_node: Option<String>,
    /// The output-type node that ended the run, when one did.
    pub terminal_node: Option<String>,
}

/// A failed BFS run, carrying the structured payload when a node produced
/// one.
struct RunFailure {
    error: ExecutionError,
    payload: Option<NodeErrorPayload>,
    last_active: Option<String>,
}

/// The workflow orchestration engine.
///
/// Owns the extension registry; everything per-execution (provider handle,
/// collaborators, options, event bus) arrives at
/// [`execute`](Self::execute) time, so one engine serves any number of
/// concurrent executions.
#[derive(Clone)]
pub struct Engine {
    extensions: ExtensionRegistry,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Engine with the nine built-in node types registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            extensions: ExtensionRegistry::with_builtins(),
        }
    }

    /// Engine over a caller-assembled registry.
    #[must_use]
    pub fn with_registry(extensions: ExtensionRegistry) -> Self {
        Self { extensions }
    }

    /// Register an additional extension.
    pub fn register<E: crate::extensions::NodeExtension + 'static>(&mut self, extension: E) {
        self.extensions.register(extension);
    }

    #[must_use]
    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    /// Statically check a workflow against this engine's registry.
    #[must_use]
    pub fn validate(
        &self,
        workflow: &WorkflowData,
        subflows: Option<&crate::subflows::SubflowRegistry>,
    ) -> ValidationReport {
        validation::validate(workflow, &self.extensions, subflows)
    }

    /// Execute a workflow to completion.
    ///
    /// Never returns `Err`: failures are encoded in the result
    /// (`success == false`) together with all partial data accumulated up to
    /// the failure, so callers can display, debug, and resume.
    #[instrument(skip_all, fields(workflow = %workflow.meta.name))]
    pub async fn execute(
        &self,
        workflow: &WorkflowData,
        input: impl Into<ExecutionInput>,
        provider: Arc<dyn ChatProvider>,
        options: ExecutionOptions,
        bus: &EventBus,
    ) -> ExecutionResult {
        let started = Instant::now();
        let input = input.into();
        let emitter = bus.emitter();

        // Preflight validation.
        if options.preflight {
            let report = validation::validate_with_depth(
                workflow,
                &self.extensions,
                Some(&options.subflow_registry),
                options.max_subflow_depth,
            );
            if !report.is_valid() {
                let error = ExecutionError::Validation(report.summary());
                let payload = NodeErrorPayload::new("workflow", "workflow", &error);
                emitter.emit(Event::NodeError {
                    node_id: "workflow".into(),
                    payload: payload.clone(),
                });
                emitter.emit(Event::Complete {
                    success: false,
                    final_output: String::new(),
                    error: Some(payload.clone()),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                return failed_result(payload, started);
            }
        }

        let graph = Arc::new(WorkflowGraph::build(workflow));
        let entry = options
            .resume_from
            .as_ref()
            .map(|resume| resume.start_node_id.clone())
            .or_else(|| graph.start_id().map(str::to_string));
        let Some(entry) = entry else {
            let error = ExecutionError::Validation("workflow has no start node".into());
            let payload = NodeErrorPayload::new("workflow", "workflow", &error);
            emitter.emit(Event::NodeError {
                node_id: "workflow".into(),
                payload: payload.clone(),
            });
            emitter.emit(Event::Complete {
                success: false,
                final_output: String::new(),
                error: Some(payload.clone()),
                duration_ms: started.elapsed().as_millis() as u64,
            });
            return failed_result(payload, started);
        };

        let cancel = options.cancel.clone().unwrap_or_default();
        let session_id = options
            .session_id
            .clone()
            .unwrap_or_else(ids::session_id);
        let session = Session::with_messages(
            session_id,
            options
                .resume_from
                .as_ref()
                .map(|resume| resume.session_messages.clone())
                .unwrap_or_default(),
        );
        let seeded_outputs: FxHashMap<String, String> = options
            .resume_from
            .as_ref()
            .map(|resume| resume.node_outputs.clone())
            .unwrap_or_default();
        let skip: FxHashSet<String> = seeded_outputs.keys().cloned().collect();

        let token_counter = options
            .token_counter
            .clone()
            .unwrap_or_else(|| Arc::new(HeuristicTokenCounter::default()));
        let services = Arc::new(ExecutionServices {
            provider,
            extensions: Arc::new(self.extensions.clone()),
            memory: options.memory.clone(),
            tools: options.tools.clone(),
            subflows: options.subflow_registry.clone(),
            hitl: options.hitl_handler.clone(),
            on_tool_call: options.on_tool_call.clone(),
            emitter,
            token_counter,
            options: options.clone(),
        });

        let ctx = ExecutionContext::new(
            ids::execution_id(),
            input.attachments,
            Arc::clone(&graph),
            services,
            cancel,
            session,
            seeded_outputs,
        );

        let tick_limit = options.scheduler_iterations(graph.node_count());
        let outcome = run_bfs(&ctx, vec![(entry, input.text)], None, tick_limit, &skip).await;

        let duration = started.elapsed();
        let ledger = ctx.usage_snapshot();
        let usage = (!ledger.per_node.is_empty()).then_some(ledger.total);

        match outcome {
            Ok(run) => {
                let final_node_id = run.terminal_node.clone();
                let final_output = final_node_id
                    .as_ref()
                    .and_then(|id| ctx.output_of(id))
                    .unwrap_or(run.last_output);
                ctx.emit(Event::Complete {
                    success: true,
                    final_output: final_output.clone(),
                    error: None,
                    duration_ms: duration.as_millis() as u64,
                });
                ExecutionResult {
                    success: true,
                    output: final_output.clone(),
                    final_output,
                    final_node_id,
                    node_outputs: ctx.outputs_snapshot(),
                    execution_order: ctx.execution_order(),
                    last_active_node_id: run.last_node,
                    error: None,
                    duration,
                    usage,
                    token_usage_details: ledger.per_node,
                    session_messages: ctx.session_messages(),
                }
            }
            Err(failure) => {
                let payload = failure.payload.unwrap_or_else(|| {
                    NodeErrorPayload::new(
                        failure.last_active.clone().unwrap_or_else(|| "workflow".into()),
                        "workflow",
                        &failure.error,
                    )
                });
                let last_output = failure
                    .last_active
                    .as_ref()
                    .and_then(|id| ctx.output_of(id))
                    .unwrap_or_default();
                ctx.emit(Event::Complete {
                    success: false,
                    final_output: last_output.clone(),
                    error: Some(payload.clone()),
                    duration_ms: duration.as_millis() as u64,
                });
                ExecutionResult {
                    success: false,
                    output: last_output.clone(),
                    final_output: last_output,
                    final_node_id: None,
                    node_outputs: ctx.outputs_snapshot(),
                    execution_order: ctx.execution_order(),
                    last_active_node_id: failure.last_active,
                    error: Some(payload),
                    duration,
                    usage,
                    token_usage_details: ledger.per_node,
                    session_messages: ctx.session_messages(),
                }
            }
        }
    }
}

fn failed_result(payload: NodeErrorPayload, started: Instant) -> ExecutionResult {
    ExecutionResult {
        success: false,
        output: String::new(),
        final_output: String::new(),
        final_node_id: None,
        node_outputs: FxHashMap::default(),
        execution_order: Vec::new(),
        last_active_node_id: None,
        error: Some(payload),
        duration: started.elapsed(),
        usage: None,
        token_usage_details: Vec::new(),
        session_messages: Vec::new(),
    }
}

/// Execute a scoped region of the current graph: the subgraph rooted at
/// `entries`, optionally bounded by a node that must not be traversed into
/// (the while-loop executor passes its own id so body back-edges return
/// instead of recursing).
///
/// Runs the same BFS loop as the top level with its own iteration cap.
pub(crate) async fn execute_subgraph(
    ctx: &ExecutionContext,
    entries: Vec<String>,
    input: &str,
    boundary: Option<&str>,
) -> Result<SubgraphOutcome, ExecutionError> {
    let scope_size = ctx
        .graph
        .reachable_from(&entries, boundary)
        .len()
        .max(1);
    let tick_limit = (scope_size * 3).max(super::options::MIN_SCHEDULER_ITERATIONS);
    let seeds: Vec<(String, String)> = entries
        .into_iter()
        .map(|id| (id, input.to_string()))
        .collect();
    run_bfs(ctx, seeds, boundary, tick_limit, &FxHashSet::default())
        .await
        .map_err(|failure| failure.error)
}

/// The BFS loop shared by the top-level run and subgraph execution.
///
/// `skip` carries resume-seeded nodes that must not re-execute.
async fn run_bfs(
    ctx: &ExecutionContext,
    entries: Vec<(String, String)>,
    boundary: Option<&str>,
    tick_limit: usize,
    skip: &FxHashSet<String>,
) -> Result<SubgraphOutcome, RunFailure> {
    let graph = &ctx.graph;
    let options = &ctx.services.options;

    let entry_ids: Vec<String> = entries.iter().map(|(id, _)| id.clone()).collect();
    let scope = graph.reachable_from(&entry_ids, boundary);

    let mut queue: VecDeque<String> = VecDeque::new();
    let mut inputs: FxHashMap<String, String> = FxHashMap::default();
    let mut scheduled: FxHashSet<String> = FxHashSet::default();
    let mut executed: FxHashSet<String> = FxHashSet::default();
    let mut outcome = SubgraphOutcome::default();
    let mut ticks = 0usize;

    for (id, input) in entries {
        inputs.insert(id.clone(), input);
        scheduled.insert(id.clone());
        queue.push_back(id);
    }

    while let Some(node_id) = queue.pop_front() {
        if ctx.cancel.is_cancelled() {
            return Err(RunFailure {
                error: ExecutionError::Cancelled,
                payload: None,
                last_active: outcome.last_node.clone(),
            });
        }

        ticks += 1;
        if ticks > tick_limit {
            let error = ExecutionError::IterationLimit { limit: tick_limit };
            return Err(RunFailure {
                payload: Some(NodeErrorPayload::new(node_id.clone(), "scheduler", &error)),
                error,
                last_active: outcome.last_node.clone(),
            });
        }

        if executed.contains(&node_id) || skip.contains(&node_id) {
            continue;
        }

        if options.debug {
            ctx.emit(Event::diagnostic(
                "scheduler",
                format!("dequeued '{node_id}' (tick {ticks}/{tick_limit})"),
            ));
        }

        // Readiness gate: every in-scope parent that has been scheduled must
        // have finished, except across a while-loop body return edge.
        let ready = graph.parents(&node_id).iter().all(|parent| {
            !scope.contains(parent)
                || !scheduled.contains(parent)
                || executed.contains(parent)
                || skip.contains(parent)
                || graph.is_loop_back_edge(parent, &node_id)
        });
        if !ready {
            queue.push_back(node_id);
            continue;
        }

        // Per-node circuit breaker.
        let runs = ctx.bump_run_count(&node_id);
        if runs > options.max_node_executions {
            let error = ExecutionError::InfiniteLoop {
                node_id: node_id.clone(),
                limit: options.max_node_executions,
            };
            let node_type = graph
                .node(&node_id)
                .map(|n| n.kind.clone())
                .unwrap_or_default();
            let payload = NodeErrorPayload::new(node_id.clone(), node_type, &error);
            ctx.emit(Event::NodeError {
                node_id: node_id.clone(),
                payload: payload.clone(),
            });
            return Err(RunFailure {
                error,
                payload: Some(payload),
                last_active: Some(node_id),
            });
        }

        let Some(node) = graph.node(&node_id).cloned() else {
            let error = ExecutionError::Validation(format!("node '{node_id}' does not exist"));
            return Err(RunFailure {
                payload: Some(NodeErrorPayload::new(node_id.clone(), "unknown", &error)),
                error,
                last_active: outcome.last_node.clone(),
            });
        };
        let Some(extension) = ctx.services.extensions.get(&node.kind) else {
            let error = ExecutionError::UnknownNodeType(node.kind.clone());
            let payload = NodeErrorPayload::new(node_id.clone(), node.kind.clone(), &error);
            ctx.emit(Event::NodeError {
                node_id: node_id.clone(),
                payload: payload.clone(),
            });
            return Err(RunFailure {
                error,
                payload: Some(payload),
                last_active: Some(node_id),
            });
        };

        let input = inputs.get(&node_id).cloned().unwrap_or_default();
        ctx.emit(Event::NodeStart {
            node_id: node.id.clone(),
            node_type: node.kind.clone(),
            label: node.label(),
        });
        let node_started = Instant::now();

        let handling = ErrorHandling::from_node_data(&node.data);
        let policy = handling
            .as_ref()
            .and_then(|h| h.retry.as_ref())
            .map(|spec| RetryPolicy::from_spec(spec, options.max_retries, options.retry_delay))
            .unwrap_or(RetryPolicy {
                max_retries: options.max_retries,
                base_delay: options.retry_delay,
                ..RetryPolicy::default()
            });

        let mut attempt = 0u32;
        let mut history: Vec<RetryAttempt> = Vec::new();
        let result = loop {
            match extension.execute(ctx, &input, &node).await {
                Ok(done) => break Ok(done),
                Err(err) => {
                    let code = err.code();
                    if code == ErrorCode::Cancelled {
                        break Err(err);
                    }
                    if !policy.should_retry(code, attempt) {
                        break Err(err);
                    }
                    let delay = policy.delay_for(attempt);
                    history.push(RetryAttempt {
                        attempt: attempt + 1,
                        code,
                        message: err.to_string(),
                        delay_ms: delay.as_millis() as u64,
                    });
                    tracing::debug!(
                        node = %node.id,
                        attempt = attempt + 1,
                        %code,
                        ?delay,
                        "retrying node after transient failure"
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = ctx.cancel.cancelled() => break Err(ExecutionError::Cancelled),
                    }
                }
            }
        };

        match result {
            Ok(execution) => {
                ctx.record_output(&node.id, &execution.output);
                ctx.push_execution_order(&node.id);
                executed.insert(node.id.clone());
                ctx.emit(Event::NodeFinish {
                    node_id: node.id.clone(),
                    node_type: node.kind.clone(),
                    output: execution.output.clone(),
                    duration_ms: node_started.elapsed().as_millis() as u64,
                });

                outcome.last_output = execution.output.clone();
                outcome.last_node = Some(node.id.clone());
                if node.kind == crate::workflow::node_type::OUTPUT {
                    outcome.terminal_node = Some(node.id.clone());
                    break;
                }

                for next in execution.next_nodes {
                    if Some(next.as_str()) == boundary {
                        continue;
                    }
                    inputs.insert(next.clone(), execution.output.clone());
                    if scheduled.insert(next.clone()) {
                        queue.push_back(next);
                    }
                }
            }
            Err(error) => {
                let payload = NodeErrorPayload::new(node.id.clone(), node.kind.clone(), &error)
                    .with_retries(history)
                    .with_label(node.label());
                let emit_error = error.code() != ErrorCode::Cancelled
                    || !ctx.cancel_error_already_emitted();
                if emit_error {
                    ctx.emit(Event::NodeError {
                        node_id: node.id.clone(),
                        payload: payload.clone(),
                    });
                }

                let mode = handling
                    .as_ref()
                    .map(|h| h.mode)
                    .unwrap_or_else(|| extension.default_error_mode());
                let error_children = graph.error_children(&node.id);

                if error.code() != ErrorCode::Cancelled
                    && mode == ErrorMode::Branch
                    && !error_children.is_empty()
                {
                    // Route the serialized error down the error handle; the
                    // node is marked errored but execution continues.
                    executed.insert(node.id.clone());
                    let branch_input = payload.to_branch_input();
                    for next in error_children {
                        if Some(next.as_str()) == boundary {
                            continue;
                        }
                        inputs.insert(next.clone(), branch_input.clone());
                        if scheduled.insert(next.clone()) {
                            queue.push_back(next);
                        }
                    }
                    continue;
                }
                if error.code() != ErrorCode::Cancelled && mode == ErrorMode::Continue {
                    executed.insert(node.id.clone());
                    continue;
                }

                return Err(RunFailure {
                    error,
                    payload: Some(payload),
                    last_active: Some(node.id),
                });
            }
        }
    }

    Ok(outcome)
}
