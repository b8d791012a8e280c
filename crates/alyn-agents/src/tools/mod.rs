//! Tool system for execution agents.
//!
//! Tools implement [`ExecutionTool`]; a [`ToolRegistry`] maps names to
//! implementations and renders the OpenAI-style schema list sent to the
//! LLM. Dispatch is a table lookup; unknown names never reach a tool (the
//! parser rejects them first).

pub mod triggers;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// A side-effecting function exposed to an execution agent.
#[async_trait]
pub trait ExecutionTool: Send + Sync {
    /// Unique name (e.g. "createTrigger").
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> Value;
    /// Run the tool. `Err` carries the error text surfaced to the LLM.
    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value, String>;
}

/// Name → implementation table for one agent run.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ExecutionTool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn ExecutionTool>>) -> Self {
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ExecutionTool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn known_names(&self) -> HashSet<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// OpenAI-compatible `{"type": "function", ...}` schema list.
    pub fn schemas(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.parameters(),
                    },
                })
            })
            .collect()
    }

    /// `(name, description)` pairs for prompt catalogs.
    pub fn catalog(&self) -> Vec<(String, String)> {
        self.tools
            .iter()
            .map(|t| (t.name().to_string(), t.description().to_string()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
