//! Agent runtimes for the orchestrator.
//!
//! Two LLM-driven loops live here: the interaction agent (the top-level
//! dispatcher users talk to) and the execution agents (named workers that
//! own a journal and call tools). Supporting services: the tool-call
//! parser, the agent roster, per-agent journals, the lessons and profile
//! stores, and the dispatcher that runs execution agents as detached
//! tasks.

pub mod dispatch;
pub mod error;
pub mod execution;
pub mod interaction;
pub mod journal;
pub mod lessons;
pub mod llm;
pub mod parse;
pub mod profile;
pub mod roster;
pub mod tools;

pub use dispatch::ExecutionDispatcher;
pub use error::{AgentError, Result};
pub use execution::ExecutionRuntime;
pub use interaction::InteractionRuntime;
pub use journal::AgentJournal;
pub use lessons::LessonStore;
pub use llm::{AssistantTurn, ChatClient, ChatRequest, OpenRouterClient};
pub use parse::{parse_tool_calls, split_known_tools, ToolCall, INVALID_ARGUMENTS_KEY};
pub use profile::ProfileStore;
pub use roster::AgentRoster;
