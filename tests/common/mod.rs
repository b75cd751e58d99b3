//! Shared test support: scripted provider, workflow fixtures, run helper.

#![allow(dead_code)]

pub mod fixtures;
pub mod provider;

use std::sync::Arc;

use loomflow::event_bus::{Event, EventBus, EventLog};
use loomflow::message::ExecutionInput;
use loomflow::provider::ChatProvider;
use loomflow::runtime::{Engine, ExecutionOptions, ExecutionResult};
use loomflow::workflow::WorkflowData;

/// Execute a workflow and return the result together with every event the
/// run emitted, in emission order.
pub async fn run_collect(
    workflow: &WorkflowData,
    input: impl Into<ExecutionInput>,
    provider: Arc<dyn ChatProvider>,
    options: ExecutionOptions,
) -> (ExecutionResult, Vec<Event>) {
    let engine = Engine::new();
    let log = EventLog::new();
    let bus = EventBus::with_sink(log.clone());
    let result = engine
        .execute(workflow, input, provider, options, &bus)
        .await;
    (result, log.snapshot())
}

/// Node ids of all `NodeFinish` events, in order.
pub fn finished_nodes(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::NodeFinish { node_id, .. } => Some(node_id.clone()),
            _ => None,
        })
        .collect()
}

/// All token deltas for one node, concatenated.
pub fn tokens_for(events: &[Event], node: &str) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Token { node_id, delta } if node_id == node => Some(delta.clone()),
            _ => None,
        })
        .collect()
}

/// The final `Complete` event, which every execution must emit exactly once.
pub fn completion(events: &[Event]) -> (bool, String) {
    let completions: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::Complete {
                success,
                final_output,
                ..
            } => Some((*success, final_output.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(completions.len(), 1, "expected exactly one Complete event");
    completions[0].clone()
}
