//! Tool registry and handler dispatch.
//!
//! Tools are registered process-wide by the embedder and invoked either by
//! agent nodes (when the model requests a tool call) or directly by tool
//! nodes. A global fallback handler may be installed for tools the registry
//! does not know.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::errors::ExecutionError;
use crate::provider::ToolSpec;

/// One tool call as dispatched to a handler.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
}

/// Async handler behind a registered tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, invocation: ToolInvocation) -> Result<String, ExecutionError>;
}

/// Blanket impl so plain async closures wrapped in a function type work as
/// handlers without a newtype at every call site.
pub struct FnToolHandler<F>(pub F);

#[async_trait]
impl<F, Fut> ToolHandler for FnToolHandler<F>
where
    F: Fn(ToolInvocation) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<String, ExecutionError>> + Send,
{
    async fn call(&self, invocation: ToolInvocation) -> Result<String, ExecutionError> {
        (self.0)(invocation).await
    }
}

/// A registered tool: schema plus handler.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's arguments.
    pub parameters: Value,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    /// The provider-facing spec for this tool.
    #[must_use]
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Process-scoped registry mapping tool name to definition.
///
/// Cloning is cheap; clones share the underlying map.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    inner: Arc<RwLock<FxHashMap<String, Arc<ToolDefinition>>>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any existing definition with the same name.
    pub fn register(&self, definition: ToolDefinition) {
        self.inner
            .write()
            .insert(definition.name.clone(), Arc::new(definition));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ToolDefinition>> {
        self.inner.read().get(name).cloned()
    }

    /// All registered tool names, sorted for determinism.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.inner.write().remove(name).is_some()
    }

    /// Provider-facing specs for a subset of tools, in the requested order.
    /// Unknown names are skipped.
    #[must_use]
    pub fn specs_for(&self, names: &[String]) -> Vec<ToolSpec> {
        let inner = self.inner.read();
        names
            .iter()
            .filter_map(|name| inner.get(name).map(|def| def.spec()))
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_tool() -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            description: "Echo the input".into(),
            parameters: json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            handler: Arc::new(FnToolHandler(|inv: ToolInvocation| async move {
                Ok(inv.arguments["text"].as_str().unwrap_or_default().to_string())
            })),
        }
    }

    #[tokio::test]
    async fn test_register_and_call() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool());

        let def = registry.get("echo").expect("registered");
        let out = def
            .handler
            .call(ToolInvocation {
                name: "echo".into(),
                arguments: json!({"text": "hi"}),
            })
            .await
            .unwrap();
        assert_eq!(out, "hi");
    }

    #[test]
    fn test_list_and_unregister() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool());
        assert_eq!(registry.list(), vec!["echo".to_string()]);
        assert!(registry.unregister("echo"));
        assert!(!registry.unregister("echo"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_specs_skip_unknown() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool());
        let specs = registry.specs_for(&["echo".into(), "missing".into()]);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "echo");
    }
}
