//! Execution runtime: the engine, its scheduler, context, and options.
//!
//! [`Engine`] is the embedder-facing entry point: it owns the extension
//! registry, validates workflows, and drives executions through the BFS
//! scheduler in [`runner`]. Per-execution state lives in
//! [`ExecutionContext`]; tuning knobs and collaborator injection in
//! [`ExecutionOptions`].

pub mod context;
pub mod options;
pub mod result;
pub mod runner;

pub use context::{
    BranchScope, CancelToken, ExecutionContext, ExecutionServices, LoopState, NodeUsage,
    UsageLedger,
};
pub use options::{ExecutionOptions, ResumeState, ToolOverflowBehavior};
pub use result::ExecutionResult;
pub use runner::Engine;
