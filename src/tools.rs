//! Tool Registry & Contract (§4.5, C6): a capability-record table replacing
//! inheritance (§9's re-architecture note) — `Tool` is a trait object keyed
//! by name, dispatched dynamically rather than through a class hierarchy.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::channels::Scope;
use crate::error::{Error, Result};
use crate::event::AgentEvent;
use crate::types::ArgNode;
use crate::workspace::WorkspaceGuard;

/// Default loop-breaking tool names (§4.5, §6): a successful call to any of
/// these ends the current turn.
pub const DEFAULT_LOOP_BREAKING_TOOLS: &[&str] = &["task_completion", "ask_question", "converse"];

/// Everything a tool needs from the Agent to execute: the turn's
/// cancellation scope, a handle to emit events directly (used by
/// `execute_command`'s streaming output — see `command.rs`), and the
/// workspace guard for validating any path/working-directory arguments.
#[derive(Clone)]
pub struct ToolContext {
    pub scope: Scope,
    pub events: mpsc::Sender<AgentEvent>,
    pub workspace: WorkspaceGuard,
}

/// A callable tool. `execute` receives the turn's [`ToolContext`] so
/// long-running tools can cooperate with cancellation, emit their own
/// events, and validate paths the same way command execution does.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// JSON-schema-shaped argument metadata, surfaced to the provider
    /// adapter and to approval previews; not interpreted by the registry
    /// itself.
    fn schema(&self) -> &Value;

    async fn execute(&self, ctx: &ToolContext, args: &ArgNode) -> Result<String>;

    /// Whether a successful execution ends the current turn (§4.5).
    fn is_loop_breaking(&self) -> bool {
        false
    }
}

/// Lookup table enforcing unique tool names (§4.5).
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if a tool with the same name already exists.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(Error::tool(format!(
                "a tool named '{name}' is already registered"
            )));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All registered names, used to render the unknown-tool recovery
    /// message (§4.9).
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn schema(&self) -> &Value {
            static SCHEMA: std::sync::OnceLock<Value> = std::sync::OnceLock::new();
            SCHEMA.get_or_init(|| serde_json::json!({}))
        }
        async fn execute(&self, _ctx: &ToolContext, args: &ArgNode) -> Result<String> {
            Ok(args.as_display_string())
        }
    }

    struct Complete;

    #[async_trait]
    impl Tool for Complete {
        fn name(&self) -> &str {
            "task_completion"
        }
        fn description(&self) -> &str {
            "ends the turn"
        }
        fn schema(&self) -> &Value {
            static SCHEMA: std::sync::OnceLock<Value> = std::sync::OnceLock::new();
            SCHEMA.get_or_init(|| serde_json::json!({}))
        }
        async fn execute(&self, _ctx: &ToolContext, _args: &ArgNode) -> Result<String> {
            Ok(String::new())
        }
        fn is_loop_breaking(&self) -> bool {
            true
        }
    }

    #[test]
    fn registers_and_looks_up_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo)).unwrap();
        assert!(registry.lookup("echo").is_some());
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo)).unwrap();
        let err = registry.register(Arc::new(Echo)).unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
    }

    #[test]
    fn names_lists_all_registered_tools_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Complete)).unwrap();
        registry.register(Arc::new(Echo)).unwrap();
        assert_eq!(registry.names(), vec!["echo", "task_completion"]);
    }

    #[test]
    fn loop_breaking_flag_is_queryable_through_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Complete)).unwrap();
        let tool = registry.lookup("task_completion").unwrap();
        assert!(tool.is_loop_breaking());
    }
}
