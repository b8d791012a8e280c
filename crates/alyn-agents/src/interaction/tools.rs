//! Interaction-agent tools: the dispatch surface the top-level LLM drives.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::{info, warn};

use alyn_core::context::current_channel;
use alyn_core::outbound::OutboundTransport;
use alyn_conversation::ConversationLog;

use crate::dispatch::ExecutionDispatcher;
use crate::journal::AgentJournal;
use crate::lessons::LessonStore;
use crate::parse::ToolCall;
use crate::roster::AgentRoster;

/// Standardized payload returned by interaction-agent tools.
#[derive(Debug, Clone)]
pub struct InteractionToolResult {
    pub success: bool,
    pub payload: Value,
    /// Text delivered to the user by this tool, if any.
    pub user_message: Option<String>,
    /// Whether the tool already wrote to the conversation log; prevents
    /// the runtime from double-recording the final reply.
    pub recorded_reply: bool,
}

impl InteractionToolResult {
    fn ok(payload: Value) -> Self {
        Self {
            success: true,
            payload,
            user_message: None,
            recorded_reply: false,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: serde_json::json!({"error": message.into()}),
            user_message: None,
            recorded_reply: false,
        }
    }
}

/// Names the tool-call parser treats as known for the interaction loop.
pub fn interaction_tool_names() -> HashSet<String> {
    [
        "send_message_to_agent",
        "send_message_to_user",
        "send_draft",
        "wait",
        "remove_agent",
        "add_lesson",
        "get_lessons",
        "delete_lesson",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// OpenAI-compatible schemas for the interaction tools.
pub fn interaction_tool_schemas() -> Vec<Value> {
    vec![
        serde_json::json!({
            "type": "function",
            "function": {
                "name": "send_message_to_agent",
                "description": "Deliver instructions to a specific execution agent. Creates a new agent if the name doesn't exist in the roster, or reuses an existing one.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "agent_name": {
                            "type": "string",
                            "description": "Human-readable agent name describing its purpose (e.g., 'Email to John'). Used to identify and potentially reuse the agent.",
                        },
                        "instructions": {
                            "type": "string",
                            "description": "Instructions for the agent to execute.",
                        },
                    },
                    "required": ["agent_name", "instructions"],
                    "additionalProperties": false,
                },
            },
        }),
        serde_json::json!({
            "type": "function",
            "function": {
                "name": "send_message_to_user",
                "description": "Deliver a natural-language response directly to the user. Use this for updates, confirmations, or any assistant response the user should see immediately.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "message": {
                            "type": "string",
                            "description": "Plain-text message shown to the user and recorded in the conversation log.",
                        },
                    },
                    "required": ["message"],
                    "additionalProperties": false,
                },
            },
        }),
        serde_json::json!({
            "type": "function",
            "function": {
                "name": "send_draft",
                "description": "Record an email draft so the user can review the exact text.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "to": {"type": "string", "description": "Recipient email for the draft."},
                        "subject": {"type": "string", "description": "Email subject for the draft."},
                        "body": {"type": "string", "description": "Email body content (plain text)."},
                    },
                    "required": ["to", "subject", "body"],
                    "additionalProperties": false,
                },
            },
        }),
        serde_json::json!({
            "type": "function",
            "function": {
                "name": "wait",
                "description": "Wait silently when a message is already in conversation history to avoid duplicating responses. Adds a wait log entry that is not visible to the user.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "reason": {
                            "type": "string",
                            "description": "Brief explanation of why waiting (e.g., 'Message already sent').",
                        },
                    },
                    "required": ["reason"],
                    "additionalProperties": false,
                },
            },
        }),
        serde_json::json!({
            "type": "function",
            "function": {
                "name": "remove_agent",
                "description": "Remove an execution agent from the roster when it is no longer needed or is a duplicate.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "agent_name": {
                            "type": "string",
                            "description": "Exact name of the agent to remove (case-insensitive).",
                        },
                        "clear_logs": {
                            "type": "boolean",
                            "description": "Optional flag to delete the agent's execution logs as well.",
                            "default": false,
                        },
                    },
                    "required": ["agent_name"],
                    "additionalProperties": false,
                },
            },
        }),
        serde_json::json!({
            "type": "function",
            "function": {
                "name": "add_lesson",
                "description": "Store a lesson learned. Use this when the user explicitly asks you to remember something or learn from a mistake.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "category": {
                            "type": "string",
                            "description": "Category of the lesson (e.g., 'email', 'calendar', 'user_preference').",
                        },
                        "problem": {
                            "type": "string",
                            "description": "The problem, mistake, or situation that occurred.",
                        },
                        "solution": {
                            "type": "string",
                            "description": "How to avoid or fix this problem in the future.",
                        },
                        "context": {
                            "type": "string",
                            "description": "Optional context about when this lesson matters.",
                        },
                    },
                    "required": ["category", "problem", "solution"],
                    "additionalProperties": false,
                },
            },
        }),
        serde_json::json!({
            "type": "function",
            "function": {
                "name": "get_lessons",
                "description": "Retrieve stored lessons, optionally filtered by category.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "category": {
                            "type": "string",
                            "description": "Optional category filter (e.g., 'email').",
                        },
                        "min_occurrences": {
                            "type": "integer",
                            "description": "Minimum occurrence count; defaults to 1.",
                        },
                    },
                    "additionalProperties": false,
                },
            },
        }),
        serde_json::json!({
            "type": "function",
            "function": {
                "name": "delete_lesson",
                "description": "Delete a stored lesson by its ID.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "lesson_id": {
                            "type": "integer",
                            "description": "The ID of the lesson to delete.",
                        },
                    },
                    "required": ["lesson_id"],
                    "additionalProperties": false,
                },
            },
        }),
    ]
}

pub struct InteractionTools {
    log: Arc<ConversationLog>,
    roster: Arc<AgentRoster>,
    journal: Arc<AgentJournal>,
    dispatcher: Arc<ExecutionDispatcher>,
    outbound: Arc<dyn OutboundTransport>,
    lessons: Arc<LessonStore>,
    /// Last outbound text per channel id, for duplicate suppression.
    last_outbound: Mutex<HashMap<String, String>>,
}

fn require_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, InteractionToolResult> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| InteractionToolResult::failure(format!("Missing required arguments: {key}")))
}

impl InteractionTools {
    pub fn new(
        log: Arc<ConversationLog>,
        roster: Arc<AgentRoster>,
        journal: Arc<AgentJournal>,
        dispatcher: Arc<ExecutionDispatcher>,
        outbound: Arc<dyn OutboundTransport>,
        lessons: Arc<LessonStore>,
    ) -> Self {
        Self {
            log,
            roster,
            journal,
            dispatcher,
            outbound,
            lessons,
            last_outbound: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatch a parsed tool call by name.
    pub async fn handle(&self, call: &ToolCall) -> InteractionToolResult {
        let args = &call.arguments;
        match call.name.as_str() {
            "send_message_to_agent" => self.send_message_to_agent(args).await,
            "send_message_to_user" => self.send_message_to_user(args).await,
            "send_draft" => self.send_draft(args).await,
            "wait" => self.wait(args).await,
            "remove_agent" => self.remove_agent(args).await,
            "add_lesson" => self.add_lesson(args),
            "get_lessons" => self.get_lessons(args),
            "delete_lesson" => self.delete_lesson(args),
            other => {
                warn!(tool = other, "unexpected interaction tool");
                InteractionToolResult::failure(format!("Unknown tool: {other}"))
            }
        }
    }

    async fn send_message_to_agent(&self, args: &Map<String, Value>) -> InteractionToolResult {
        let agent_name = match require_str(args, "agent_name") {
            Ok(v) => v.to_string(),
            Err(e) => return e,
        };
        let instructions = match require_str(args, "instructions") {
            Ok(v) => v.to_string(),
            Err(e) => return e,
        };

        self.roster.load();
        self.roster.prune_duplicates();
        let is_new = !self.roster.has_agent(&agent_name);
        if is_new {
            self.roster.add_agent(&agent_name);
        }

        if let Err(e) = self.journal.record_request(&agent_name, &instructions).await {
            warn!(agent = %agent_name, error = %e, "failed to journal agent request");
        }

        info!(
            agent = %agent_name,
            action = if is_new { "created" } else { "reused" },
            "dispatching to execution agent"
        );
        self.dispatcher.spawn(agent_name.clone(), instructions);

        InteractionToolResult::ok(serde_json::json!({
            "status": "submitted",
            "agent_name": agent_name,
            "new_agent_created": is_new,
        }))
    }

    async fn send_message_to_user(&self, args: &Map<String, Value>) -> InteractionToolResult {
        let message = match require_str(args, "message") {
            Ok(v) => v.to_string(),
            Err(e) => return e,
        };

        if let Err(e) = self.log.record_reply(&message).await {
            return InteractionToolResult::failure(format!("failed to record reply: {e}"));
        }

        let mut result = InteractionToolResult::ok(serde_json::json!({"status": "delivered"}));
        result.user_message = Some(message.clone());
        result.recorded_reply = true;

        let Some(channel_id) = current_channel() else {
            warn!("no delivery channel in context, reply recorded but not sent");
            return result;
        };

        let is_duplicate = {
            let cache = self.last_outbound.lock().unwrap();
            cache.get(&channel_id).is_some_and(|last| last == &message)
        };
        if is_duplicate {
            info!(channel = %channel_id, "duplicate outbound message, skipping delivery");
            result.payload = serde_json::json!({"status": "duplicate_skipped"});
            return result;
        }

        if self.outbound.send(&channel_id, &message).await {
            self.last_outbound
                .lock()
                .unwrap()
                .insert(channel_id, message);
        } else {
            warn!(channel = %channel_id, "outbound delivery failed");
        }
        result
    }

    async fn send_draft(&self, args: &Map<String, Value>) -> InteractionToolResult {
        let to = match require_str(args, "to") {
            Ok(v) => v.to_string(),
            Err(e) => return e,
        };
        let subject = match require_str(args, "subject") {
            Ok(v) => v.to_string(),
            Err(e) => return e,
        };
        let body = match require_str(args, "body") {
            Ok(v) => v.to_string(),
            Err(e) => return e,
        };

        let message = format!("To: {to}\nSubject: {subject}\n\n{body}");
        if let Err(e) = self.log.record_reply(&message).await {
            return InteractionToolResult::failure(format!("failed to record draft: {e}"));
        }
        info!(to = %to, "draft recorded");

        let mut result = InteractionToolResult::ok(serde_json::json!({
            "status": "draft_recorded",
            "to": to,
            "subject": subject,
        }));
        result.recorded_reply = true;
        result
    }

    async fn wait(&self, args: &Map<String, Value>) -> InteractionToolResult {
        let reason = match require_str(args, "reason") {
            Ok(v) => v.to_string(),
            Err(e) => return e,
        };
        if let Err(e) = self.log.record_wait(&reason).await {
            return InteractionToolResult::failure(format!("failed to record wait: {e}"));
        }
        let mut result = InteractionToolResult::ok(serde_json::json!({
            "status": "waiting",
            "reason": reason,
        }));
        result.recorded_reply = true;
        result
    }

    async fn remove_agent(&self, args: &Map<String, Value>) -> InteractionToolResult {
        let agent_name = match require_str(args, "agent_name") {
            Ok(v) => v.to_string(),
            Err(e) => return e,
        };
        let clear_logs = args
            .get("clear_logs")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        self.roster.load();
        self.roster.prune_duplicates();
        let removed = self.roster.remove_agent(&agent_name);

        if removed && clear_logs {
            if let Err(e) = self.journal.remove(&agent_name).await {
                warn!(agent = %agent_name, error = %e, "failed to clear agent journal");
            }
        }

        if removed {
            info!(agent = %agent_name, "agent removed via tool");
            InteractionToolResult::ok(serde_json::json!({
                "status": "removed",
                "agent_name": agent_name,
                "logs_cleared": clear_logs,
            }))
        } else {
            info!(agent = %agent_name, "agent removal requested but no matching entry found");
            InteractionToolResult {
                success: false,
                payload: serde_json::json!({
                    "status": "not_found",
                    "agent_name": agent_name,
                    "logs_cleared": false,
                }),
                user_message: None,
                recorded_reply: false,
            }
        }
    }

    fn add_lesson(&self, args: &Map<String, Value>) -> InteractionToolResult {
        let category = match require_str(args, "category") {
            Ok(v) => v.to_string(),
            Err(e) => return e,
        };
        let problem = match require_str(args, "problem") {
            Ok(v) => v.to_string(),
            Err(e) => return e,
        };
        let solution = match require_str(args, "solution") {
            Ok(v) => v.to_string(),
            Err(e) => return e,
        };
        let context = args.get("context").and_then(Value::as_str);

        match self.lessons.add_lesson(&category, &problem, &solution, context) {
            Ok(lesson) => InteractionToolResult::ok(serde_json::json!({
                "status": "lesson_added",
                "lesson_id": lesson.id,
                "category": category,
                "message": format!("Lesson ajoutée dans la catégorie '{category}'."),
            })),
            Err(e) => InteractionToolResult::failure(format!("Failed to add lesson: {e}")),
        }
    }

    fn get_lessons(&self, args: &Map<String, Value>) -> InteractionToolResult {
        let category = args.get("category").and_then(Value::as_str);
        let min_occurrences = args
            .get("min_occurrences")
            .and_then(Value::as_i64)
            .unwrap_or(1);

        match self.lessons.get_lessons(category, min_occurrences) {
            Ok(lessons) => {
                let total = lessons.len();
                let message = if total == 0 {
                    match category {
                        Some(category) => {
                            format!("Aucune lesson trouvée dans la catégorie '{category}'.")
                        }
                        None => "Aucune lesson trouvée.".to_string(),
                    }
                } else {
                    format!("Trouvé {total} lesson(s).")
                };
                InteractionToolResult::ok(serde_json::json!({
                    "status": if total == 0 { "no_lessons" } else { "lessons_found" },
                    "lessons": lessons,
                    "total": total,
                    "message": message,
                }))
            }
            Err(e) => InteractionToolResult::failure(format!("Failed to retrieve lessons: {e}")),
        }
    }

    fn delete_lesson(&self, args: &Map<String, Value>) -> InteractionToolResult {
        let Some(lesson_id) = args.get("lesson_id").and_then(Value::as_i64) else {
            return InteractionToolResult::failure("Missing required arguments: lesson_id");
        };
        match self.lessons.delete_lesson(lesson_id) {
            Ok(true) => InteractionToolResult::ok(serde_json::json!({
                "status": "lesson_deleted",
                "lesson_id": lesson_id,
                "message": format!("Lesson #{lesson_id} supprimée."),
            })),
            Ok(false) => InteractionToolResult::failure(format!(
                "Aucune lesson trouvée avec l'ID {lesson_id}"
            )),
            Err(e) => InteractionToolResult::failure(format!("Failed to delete lesson: {e}")),
        }
    }
}
