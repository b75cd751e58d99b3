//! Observer-side accumulation of branch token streams.
//!
//! Branch streams are keyed by `(node_id, instance, branch_id)`, where
//! `instance` increments on each new execution of the parallel node. The
//! instance counter keeps successive loop iterations from colliding on the
//! same key. Clearing rules differ by branch kind: the synthetic merge
//! stream is cleared on its own completion, while regular branch streams
//! are cleared only once every regular branch of that instance reports
//! complete.

use rustc_hash::FxHashMap;

use super::event::{Event, MERGE_BRANCH_ID};

/// One accumulated branch stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BranchStream {
    pub label: Option<String>,
    pub text: String,
    pub reasoning: String,
    pub completed: bool,
    pub error: Option<String>,
}

/// Accumulates branch streaming events into per-branch buffers.
///
/// Feed every event from the bus through [`observe`](Self::observe); non-branch
/// events are ignored, so the tracker can sit directly on an event stream.
#[derive(Clone, Debug, Default)]
pub struct BranchStreamTracker {
    streams: FxHashMap<(String, u64), FxHashMap<String, BranchStream>>,
}

impl BranchStreamTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the tracker.
    pub fn observe(&mut self, event: &Event) {
        match event {
            Event::BranchStart {
                node_id,
                branch_id,
                label,
                instance,
            } => {
                self.streams
                    .entry((node_id.clone(), *instance))
                    .or_default()
                    .insert(
                        branch_id.clone(),
                        BranchStream {
                            label: label.clone(),
                            ..Default::default()
                        },
                    );
            }
            Event::BranchToken {
                node_id,
                branch_id,
                instance,
                delta,
            } => {
                if let Some(stream) = self.stream_mut(node_id, *instance, branch_id) {
                    stream.text.push_str(delta);
                }
            }
            Event::BranchReasoning {
                node_id,
                branch_id,
                instance,
                delta,
            } => {
                if let Some(stream) = self.stream_mut(node_id, *instance, branch_id) {
                    stream.reasoning.push_str(delta);
                }
            }
            Event::BranchComplete {
                node_id,
                branch_id,
                instance,
                output,
                error,
            } => {
                if let Some(stream) = self.stream_mut(node_id, *instance, branch_id) {
                    stream.completed = true;
                    stream.error = error.clone();
                    if stream.text.is_empty()
                        && let Some(output) = output
                    {
                        stream.text = output.clone();
                    }
                }
                self.apply_clearing(node_id, *instance, branch_id);
            }
            _ => {}
        }
    }

    fn stream_mut(
        &mut self,
        node_id: &str,
        instance: u64,
        branch_id: &str,
    ) -> Option<&mut BranchStream> {
        self.streams
            .get_mut(&(node_id.to_string(), instance))
            .and_then(|branches| branches.get_mut(branch_id))
    }

    fn apply_clearing(&mut self, node_id: &str, instance: u64, completed_branch: &str) {
        let key = (node_id.to_string(), instance);
        let Some(branches) = self.streams.get_mut(&key) else {
            return;
        };
        if completed_branch == MERGE_BRANCH_ID {
            branches.remove(MERGE_BRANCH_ID);
        } else {
            // The merge stream never gates regular-branch clearing.
            let all_regular_done = branches
                .iter()
                .filter(|(id, _)| id.as_str() != MERGE_BRANCH_ID)
                .all(|(_, s)| s.completed);
            if all_regular_done {
                branches.retain(|id, _| id == MERGE_BRANCH_ID);
            }
        }
        if branches.is_empty() {
            self.streams.remove(&key);
        }
    }

    /// Access the live stream for a key, if any.
    #[must_use]
    pub fn stream(&self, node_id: &str, instance: u64, branch_id: &str) -> Option<&BranchStream> {
        self.streams
            .get(&(node_id.to_string(), instance))
            .and_then(|branches| branches.get(branch_id))
    }

    /// Number of live (uncleared) streams across all instances.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.streams.values().map(FxHashMap::len).sum()
    }
}
