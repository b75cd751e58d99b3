//! # Loomflow: Workflow Orchestration Core for AI-Agent Graphs
//!
//! Loomflow is a headless engine that executes user-authored directed graphs
//! of AI-agent nodes against a pluggable LLM provider. It traverses the
//! graph with dependency-gated BFS, streams tokens to observers, routes
//! execution along dynamic branches, runs parallel subgraphs with a merge
//! phase, iterates bounded loops, dispatches tool calls, pauses for
//! human-in-the-loop review, compacts conversation context, and returns a
//! final output with per-node results and usage statistics.
//!
//! ## Core Concepts
//!
//! - **Workflow**: nodes + edges + metadata, serialized as versioned JSON
//! - **Extension**: the registered behavior of one node type (ports,
//!   validation, executor)
//! - **Engine**: validates workflows and drives executions
//! - **Provider**: the pluggable chat/stream interface over an LLM client
//! - **Event bus**: the typed event stream observers consume
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use loomflow::event_bus::EventBus;
//! use loomflow::runtime::{Engine, ExecutionOptions};
//! use loomflow::workflow::{WorkflowData, WorkflowEdge, WorkflowNode, node_type};
//! use serde_json::json;
//!
//! # async fn example(provider: Arc<dyn loomflow::provider::ChatProvider>) {
//! let workflow = WorkflowData::new("echo")
//!     .with_node(WorkflowNode::new("start-1", node_type::START, json!({})))
//!     .with_node(WorkflowNode::new(
//!         "agent-1",
//!         node_type::AGENT,
//!         json!({"model": "gpt-4o-mini", "prompt": "Echo the input."}),
//!     ))
//!     .with_edge(WorkflowEdge::new("e1", "start-1", "agent-1"));
//!
//! let engine = Engine::new();
//! let bus = EventBus::default();
//!
//! let result = engine
//!     .execute(&workflow, "hello", provider, ExecutionOptions::default(), &bus)
//!     .await;
//! assert!(result.success);
//! # }
//! ```
//!
//! ## Observing an Execution
//!
//! Subscribe to the bus and consume only the events you need:
//!
//! ```rust,no_run
//! use loomflow::event_bus::{Event, EventBus};
//!
//! # async fn example() {
//! let bus = EventBus::sinkless();
//! let mut stream = bus.subscribe();
//! tokio::spawn(async move {
//!     while let Some(event) = stream.recv().await {
//!         if let Event::Token { node_id, delta } = event {
//!             print!("{delta}");
//!             let _ = node_id;
//!         }
//!     }
//! });
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`workflow`] - Data model, ports, adjacency, validation
//! - [`extensions`] - Node-type registry and the built-in executors
//! - [`runtime`] - Engine, scheduler, context, options, results
//! - [`provider`] - LLM provider abstraction
//! - [`event_bus`] - Typed events, sinks, and subscriptions
//! - [`session`] / [`memory`] - Conversation history and vector memory
//! - [`compaction`] - Token counting and context reduction
//! - [`hitl`] - Human-in-the-loop suspension protocol
//! - [`errors`] / [`retry`] - Error taxonomy and backoff policy

pub mod compaction;
pub mod errors;
pub mod event_bus;
pub mod extensions;
pub mod hitl;
pub mod memory;
pub mod message;
pub mod provider;
pub mod retry;
pub mod runtime;
pub mod session;
pub mod subflows;
pub mod telemetry;
pub mod tools;
pub mod utils;
pub mod workflow;
