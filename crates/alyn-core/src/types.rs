use serde::{Deserialize, Serialize};
use std::fmt;

/// Speaker of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ExecutionAgent,
    Tool,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ExecutionAgent => "execution_agent",
            Role::Tool => "tool",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in chat-projection form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
        }
    }
}

/// Outcome of running one execution agent to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub agent_name: String,
    pub success: bool,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tool names in execution order.
    #[serde(default)]
    pub tools_executed: Vec<String>,
}

impl ExecutionResult {
    pub fn failure(agent_name: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            agent_name: agent_name.into(),
            success: false,
            response: format!("Failed to complete task: {error}"),
            error: Some(error),
            tools_executed: Vec::new(),
        }
    }
}

/// Outcome of one interaction-agent turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionResult {
    pub success: bool,
    /// Final user-visible text; empty when the turn was swallowed
    /// (duplicate) or produced no reply.
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_agents_used: usize,
}

impl InteractionResult {
    pub fn swallowed() -> Self {
        Self {
            success: true,
            response: String::new(),
            error: None,
            execution_agents_used: 0,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            response: String::new(),
            error: Some(error.into()),
            execution_agents_used: 0,
        }
    }
}

/// Completion notice emitted by an execution agent, routed back into the
/// interaction runtime's agent-message path.
#[derive(Debug, Clone)]
pub struct AgentEvent {
    pub agent_name: String,
    /// Formatted `[SUCCESS|FAILED] <agent>: <response>` text.
    pub message: String,
    /// Channel the originating turn came from, when known. Restored as
    /// the delivery context while the event is processed.
    pub channel_id: Option<String>,
}

impl AgentEvent {
    pub fn from_result(result: &ExecutionResult) -> Self {
        let status = if result.success { "SUCCESS" } else { "FAILED" };
        let body = if result.response.is_empty() {
            result.error.as_deref().unwrap_or("(no response)")
        } else {
            &result.response
        };
        Self {
            agent_name: result.agent_name.clone(),
            message: format!("[{status}] {}: {body}", result.agent_name),
            channel_id: None,
        }
    }
}
