use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("LLM request failed: {0}")]
    Llm(#[from] crate::llm::LlmError),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Agent '{agent}' execution failed: {message}")]
    AgentExecution { agent: String, message: String },

    #[error("Reached tool iteration limit without final response")]
    IterationLimit,

    #[error("LLM did not return a final response")]
    MissingResponse,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Trigger(#[from] alyn_triggers::TriggerError),

    #[error(transparent)]
    Conversation(#[from] alyn_conversation::ConversationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
