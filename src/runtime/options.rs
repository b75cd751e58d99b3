//! Execution options: tuning knobs and collaborator injection.

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::compaction::{CompactionConfig, TokenCounter};
use crate::extensions::while_loop::LoopEvaluator;
use crate::hitl::HitlHandler;
use crate::memory::MemoryAdapter;
use crate::message::ChatMessage;
use crate::subflows::SubflowRegistry;
use crate::tools::{ToolHandler, ToolRegistry};

use super::context::CancelToken;

/// Per-node circuit breaker default.
pub const DEFAULT_MAX_NODE_EXECUTIONS: u32 = 100;
/// Subflow nesting cap default.
pub const DEFAULT_MAX_SUBFLOW_DEPTH: usize = 10;
/// Tool-call loop bound default.
pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 10;
/// Per-branch timeout inside parallel nodes.
pub const DEFAULT_BRANCH_TIMEOUT: Duration = Duration::from_secs(60);
/// Floor for the scheduler iteration bound regardless of workflow size.
pub const MIN_SCHEDULER_ITERATIONS: usize = 16;

/// Environment variable consulted for the fallback model.
pub const DEFAULT_MODEL_ENV: &str = "LOOMFLOW_DEFAULT_MODEL";

/// Behavior when an agent's tool-call loop exceeds its bound.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOverflowBehavior {
    /// Append a notice to the output and continue without further calls.
    #[default]
    Warning,
    /// Fail the node.
    Error,
    /// Pause for a human decision on whether to continue.
    Hitl,
}

/// State handed back to a new execution to continue after a failure.
#[derive(Clone, Debug, Default)]
pub struct ResumeState {
    /// Node to restart from.
    pub start_node_id: String,
    /// Outputs of nodes that already ran; these are not re-executed.
    pub node_outputs: FxHashMap<String, String>,
    /// Session transcript to seed the new session with.
    pub session_messages: Vec<ChatMessage>,
}

/// Options recognized by [`Engine::execute`](crate::runtime::Engine::execute).
///
/// Collaborators (memory, tools, subflows, HITL handler) ride along here so
/// one call site configures a whole execution.
#[derive(Clone)]
pub struct ExecutionOptions {
    /// Fallback model for nodes that omit one. Resolved from the
    /// `LOOMFLOW_DEFAULT_MODEL` environment variable when unset.
    pub default_model: Option<String>,
    /// Default retry count for nodes without an explicit policy.
    pub max_retries: u32,
    /// Default base backoff delay.
    pub retry_delay: Duration,
    /// Scheduler safety bound; `nodes.len() * 3` (floored) when `None`.
    pub max_iterations: Option<usize>,
    /// Per-node circuit breaker.
    pub max_node_executions: u32,
    /// Subflow nesting cap.
    pub max_subflow_depth: usize,
    /// Tool-call loop bound.
    pub max_tool_iterations: u32,
    pub on_max_tool_iterations: ToolOverflowBehavior,
    /// Per-branch timeout inside parallel nodes.
    pub branch_timeout: Duration,
    pub compaction: CompactionConfig,
    /// Token measurement backend; heuristic counter when `None`.
    pub token_counter: Option<Arc<dyn TokenCounter>>,
    pub memory: Option<Arc<dyn MemoryAdapter>>,
    pub subflow_registry: SubflowRegistry,
    pub tools: ToolRegistry,
    /// Global fallback handler for tools absent from the registry.
    pub on_tool_call: Option<Arc<dyn ToolHandler>>,
    pub hitl_handler: Option<Arc<dyn HitlHandler>>,
    /// Named evaluators referenced by while-loop nodes.
    pub custom_evaluators: FxHashMap<String, Arc<dyn LoopEvaluator>>,
    /// Session id; generated when unset.
    pub session_id: Option<String>,
    pub resume_from: Option<ResumeState>,
    /// Cancellation signal; a fresh token is created when unset.
    pub cancel: Option<CancelToken>,
    /// Run validation before executing.
    pub preflight: bool,
    pub debug: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        dotenvy::dotenv().ok();
        Self {
            default_model: std::env::var(DEFAULT_MODEL_ENV).ok(),
            max_retries: crate::retry::DEFAULT_MAX_RETRIES,
            retry_delay: crate::retry::DEFAULT_BASE_DELAY,
            max_iterations: None,
            max_node_executions: DEFAULT_MAX_NODE_EXECUTIONS,
            max_subflow_depth: DEFAULT_MAX_SUBFLOW_DEPTH,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            on_max_tool_iterations: ToolOverflowBehavior::default(),
            branch_timeout: DEFAULT_BRANCH_TIMEOUT,
            compaction: CompactionConfig::default(),
            token_counter: None,
            memory: None,
            subflow_registry: SubflowRegistry::new(),
            tools: ToolRegistry::new(),
            on_tool_call: None,
            hitl_handler: None,
            custom_evaluators: FxHashMap::default(),
            session_id: None,
            resume_from: None,
            cancel: None,
            preflight: true,
            debug: false,
        }
    }
}

impl ExecutionOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_memory(mut self, memory: Arc<dyn MemoryAdapter>) -> Self {
        self.memory = Some(memory);
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn with_subflows(mut self, registry: SubflowRegistry) -> Self {
        self.subflow_registry = registry;
        self
    }

    #[must_use]
    pub fn with_hitl(mut self, handler: Arc<dyn HitlHandler>) -> Self {
        self.hitl_handler = Some(handler);
        self
    }

    #[must_use]
    pub fn with_evaluator(
        mut self,
        name: impl Into<String>,
        evaluator: Arc<dyn LoopEvaluator>,
    ) -> Self {
        self.custom_evaluators.insert(name.into(), evaluator);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_resume(mut self, resume: ResumeState) -> Self {
        self.resume_from = Some(resume);
        self
    }

    #[must_use]
    pub fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }

    #[must_use]
    pub fn without_preflight(mut self) -> Self {
        self.preflight = false;
        self
    }

    /// The scheduler iteration bound for a workflow of `node_count` nodes.
    #[must_use]
    pub fn scheduler_iterations(&self, node_count: usize) -> usize {
        self.max_iterations
            .unwrap_or_else(|| (node_count * 3).max(MIN_SCHEDULER_ITERATIONS))
    }
}

impl std::fmt::Debug for ExecutionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionOptions")
            .field("default_model", &self.default_model)
            .field("max_retries", &self.max_retries)
            .field("max_iterations", &self.max_iterations)
            .field("max_node_executions", &self.max_node_executions)
            .field("max_subflow_depth", &self.max_subflow_depth)
            .field("max_tool_iterations", &self.max_tool_iterations)
            .field("preflight", &self.preflight)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}
