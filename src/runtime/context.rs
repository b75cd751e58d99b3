//! Per-execution state and the context borrowed by executors.
//!
//! The scheduler owns one [`ExecutionContext`] per execution; executors
//! receive cheap clones whose interior maps are shared. Shared services
//! (provider, registries, emitter) live behind one `Arc`; mutable state
//! (outputs, session, loop bookkeeping) sits behind short-lived locks that
//! are never held across an await point.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::watch;

use crate::compaction::TokenCounter;
use crate::event_bus::{Event, EventEmitter};
use crate::extensions::ExtensionRegistry;
use crate::hitl::HitlHandler;
use crate::memory::MemoryAdapter;
use crate::message::{Attachment, ChatMessage, TokenUsage};
use crate::provider::ChatProvider;
use crate::session::Session;
use crate::subflows::SubflowRegistry;
use crate::tools::{ToolHandler, ToolRegistry};
use crate::workflow::WorkflowGraph;

use super::options::ExecutionOptions;

/// Cooperative cancellation signal threaded through an execution.
///
/// Cloning shares the signal. `stop()` on the engine side fires it; all
/// executors and the provider observe it at their next suspension point.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal fires. Resolves immediately if already fired.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        // Sender dropped without firing: treat as never-cancelled and park.
        std::future::pending::<()>().await;
    }
}

/// Identifies the branch scope an executor is streaming into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchScope {
    pub node_id: String,
    pub branch_id: String,
    pub instance: u64,
}

/// Per-execution bookkeeping for one while-loop node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoopState {
    pub iteration: u32,
    pub outputs: Vec<String>,
    pub last_output: Option<String>,
    pub is_active: bool,
}

/// Usage attributed to one node.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeUsage {
    pub node_id: String,
    pub usage: TokenUsage,
}

/// Aggregate plus per-node token accounting.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UsageLedger {
    pub total: TokenUsage,
    pub per_node: Vec<NodeUsage>,
}

impl UsageLedger {
    pub fn record(&mut self, node_id: &str, usage: TokenUsage) {
        self.total.add(&usage);
        self.per_node.push(NodeUsage {
            node_id: node_id.to_string(),
            usage,
        });
    }
}

/// Shared, immutable collaborators for one execution.
pub struct ExecutionServices {
    pub provider: Arc<dyn ChatProvider>,
    pub extensions: Arc<ExtensionRegistry>,
    pub memory: Option<Arc<dyn MemoryAdapter>>,
    pub tools: ToolRegistry,
    pub subflows: SubflowRegistry,
    pub hitl: Option<Arc<dyn HitlHandler>>,
    pub on_tool_call: Option<Arc<dyn ToolHandler>>,
    pub emitter: Arc<dyn EventEmitter>,
    pub token_counter: Arc<dyn TokenCounter>,
    pub options: ExecutionOptions,
}

/// The execution context borrowed by executors.
///
/// Clones are cheap and share all interior state; the subgraph helpers and
/// the parallel executor clone it to adjust `graph`, `branch`, or
/// `subflow_depth` without touching shared maps.
#[derive(Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub attachments: Arc<Vec<Attachment>>,
    pub graph: Arc<WorkflowGraph>,
    pub services: Arc<ExecutionServices>,
    pub cancel: CancelToken,
    pub subflow_depth: usize,
    /// Set when executing inside a parallel branch; routes streaming events
    /// onto branch-scoped variants.
    pub branch: Option<Arc<BranchScope>>,
    outputs: Arc<Mutex<FxHashMap<String, String>>>,
    session: Arc<Mutex<Session>>,
    loop_states: Arc<Mutex<FxHashMap<String, LoopState>>>,
    run_counts: Arc<Mutex<FxHashMap<String, u32>>>,
    branch_instances: Arc<Mutex<FxHashMap<String, u64>>>,
    usage: Arc<Mutex<UsageLedger>>,
    execution_order: Arc<Mutex<Vec<String>>>,
    cancel_error_emitted: Arc<AtomicBool>,
}

impl ExecutionContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        execution_id: String,
        attachments: Vec<Attachment>,
        graph: Arc<WorkflowGraph>,
        services: Arc<ExecutionServices>,
        cancel: CancelToken,
        session: Session,
        seeded_outputs: FxHashMap<String, String>,
    ) -> Self {
        Self {
            execution_id,
            attachments: Arc::new(attachments),
            graph,
            services,
            cancel,
            subflow_depth: 0,
            branch: None,
            outputs: Arc::new(Mutex::new(seeded_outputs)),
            session: Arc::new(Mutex::new(session)),
            loop_states: Arc::new(Mutex::new(FxHashMap::default())),
            run_counts: Arc::new(Mutex::new(FxHashMap::default())),
            branch_instances: Arc::new(Mutex::new(FxHashMap::default())),
            usage: Arc::new(Mutex::new(UsageLedger::default())),
            execution_order: Arc::new(Mutex::new(Vec::new())),
            cancel_error_emitted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Marks the single `CANCELLED` node-error emission as taken; returns
    /// whether it had already been taken.
    pub(crate) fn cancel_error_already_emitted(&self) -> bool {
        self.cancel_error_emitted.swap(true, Ordering::SeqCst)
    }

    /// Emit an event through the execution's emitter.
    pub fn emit(&self, event: Event) {
        self.services.emitter.emit(event);
    }

    // ------------------------------------------------------------------
    // Outputs
    // ------------------------------------------------------------------

    pub fn record_output(&self, node_id: &str, output: &str) {
        self.outputs
            .lock()
            .insert(node_id.to_string(), output.to_string());
    }

    #[must_use]
    pub fn output_of(&self, node_id: &str) -> Option<String> {
        self.outputs.lock().get(node_id).cloned()
    }

    #[must_use]
    pub fn has_output(&self, node_id: &str) -> bool {
        self.outputs.lock().contains_key(node_id)
    }

    /// Snapshot of all node outputs recorded so far.
    #[must_use]
    pub fn outputs_snapshot(&self) -> FxHashMap<String, String> {
        self.outputs.lock().clone()
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    #[must_use]
    pub fn session_id(&self) -> String {
        self.session.lock().id.clone()
    }

    #[must_use]
    pub fn session_messages(&self) -> Vec<ChatMessage> {
        self.session.lock().messages.clone()
    }

    pub fn session_push(&self, message: ChatMessage) {
        self.session.lock().push(message);
    }

    /// Replace the session transcript (compaction applies its result here).
    pub fn session_replace(&self, messages: Vec<ChatMessage>) {
        self.session.lock().replace(messages);
    }

    /// Fork a context for a subflow: fresh outputs and loop state, one level
    /// deeper, optionally sharing the parent session by reference.
    #[must_use]
    pub(crate) fn fork_for_subflow(
        &self,
        graph: Arc<WorkflowGraph>,
        share_session: bool,
        session_id: String,
    ) -> Self {
        let mut forked = self.clone();
        forked.graph = graph;
        forked.subflow_depth += 1;
        forked.outputs = Arc::new(Mutex::new(FxHashMap::default()));
        forked.loop_states = Arc::new(Mutex::new(FxHashMap::default()));
        forked.run_counts = Arc::new(Mutex::new(FxHashMap::default()));
        forked.execution_order = Arc::new(Mutex::new(Vec::new()));
        if !share_session {
            forked.session = Arc::new(Mutex::new(Session::new(session_id)));
        }
        forked
    }

    /// Clone with a branch scope attached (parallel executor).
    #[must_use]
    pub(crate) fn with_branch(&self, scope: BranchScope) -> Self {
        let mut branched = self.clone();
        branched.branch = Some(Arc::new(scope));
        branched
    }

    // ------------------------------------------------------------------
    // Loop state
    // ------------------------------------------------------------------

    #[must_use]
    pub fn loop_state(&self, node_id: &str) -> Option<LoopState> {
        self.loop_states.lock().get(node_id).cloned()
    }

    pub fn set_loop_state(&self, node_id: &str, state: LoopState) {
        self.loop_states.lock().insert(node_id.to_string(), state);
    }

    pub fn clear_loop_state(&self, node_id: &str) {
        self.loop_states.lock().remove(node_id);
    }

    // ------------------------------------------------------------------
    // Circuit breaker & instances
    // ------------------------------------------------------------------

    /// Increment and return the per-node execution count.
    pub fn bump_run_count(&self, node_id: &str) -> u32 {
        let mut counts = self.run_counts.lock();
        let count = counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Next branch-stream instance for a parallel node. Excludes the merge
    /// phase: one bump per parallel-node execution.
    pub fn next_branch_instance(&self, node_id: &str) -> u64 {
        let mut instances = self.branch_instances.lock();
        let counter = instances.entry(node_id.to_string()).or_insert(0);
        let current = *counter;
        *counter += 1;
        current
    }

    // ------------------------------------------------------------------
    // Usage & order
    // ------------------------------------------------------------------

    pub fn record_usage(&self, node_id: &str, usage: TokenUsage) {
        self.usage.lock().record(node_id, usage);
    }

    #[must_use]
    pub fn usage_snapshot(&self) -> UsageLedger {
        self.usage.lock().clone()
    }

    pub(crate) fn push_execution_order(&self, node_id: &str) {
        self.execution_order.lock().push(node_id.to_string());
    }

    #[must_use]
    pub fn execution_order(&self) -> Vec<String> {
        self.execution_order.lock().clone()
    }
}
