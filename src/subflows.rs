//! Registry of reusable workflows invocable as single nodes.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowData;

/// A registered subflow definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub workflow: WorkflowData,
}

/// Process-scoped registry mapping subflow id to definition.
///
/// Cloning is cheap; clones share the underlying map.
#[derive(Clone, Default)]
pub struct SubflowRegistry {
    inner: Arc<RwLock<FxHashMap<String, Arc<SubflowDefinition>>>>,
}

impl SubflowRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: SubflowDefinition) {
        self.inner
            .write()
            .insert(definition.id.clone(), Arc::new(definition));
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<SubflowDefinition>> {
        self.inner.read().get(id).cloned()
    }

    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.inner.read().contains_key(id)
    }

    /// All registered subflow ids, sorted for determinism.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.inner.write().remove(id).is_some()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

impl std::fmt::Debug for SubflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubflowRegistry")
            .field("subflows", &self.list())
            .finish()
    }
}
