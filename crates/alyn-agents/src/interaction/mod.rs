//! Interaction agent runtime: the top-level dispatcher for user messages
//! and asynchronous execution-agent updates.

pub mod prompt;
pub mod reminder;
pub mod tools;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use alyn_core::types::{InteractionResult, Role};
use alyn_conversation::{ConversationLog, DuplicateDetector};

use crate::error::{AgentError, Result};
use crate::execution::{assistant_entry, format_tool_result, tool_message};
use crate::lessons::LessonStore;
use crate::llm::{ChatClient, ChatRequest};
use crate::parse::parse_tool_calls;
use crate::profile::ProfileStore;
use crate::roster::AgentRoster;

use prompt::{build_system_prompt, prepare_message_with_history, TurnKind};
use reminder::{ReminderMessageParser, ReminderMessageType};
use tools::{interaction_tool_names, interaction_tool_schemas, InteractionTools};

pub const MAX_TOOL_ITERATIONS: usize = 8;

/// Aggregate information produced by one interaction loop.
#[derive(Default)]
struct LoopSummary {
    last_assistant_text: String,
    /// Texts delivered via `send_message_to_user`, in call order.
    user_messages: Vec<String>,
    /// Distinct agent names dispatched to this turn.
    execution_agents: HashSet<String>,
}

pub struct InteractionRuntime {
    client: Arc<dyn ChatClient>,
    model: String,
    max_tokens: u32,
    log: Arc<ConversationLog>,
    roster: Arc<AgentRoster>,
    dedup: Mutex<DuplicateDetector>,
    tools: InteractionTools,
    lessons: Arc<LessonStore>,
    profile: Arc<ProfileStore>,
    /// `(name, description)` catalog of execution tools, for the prompt.
    execution_catalog: Vec<(String, String)>,
    reminder_parser: ReminderMessageParser,
    known_tools: HashSet<String>,
}

impl InteractionRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ChatClient>,
        model: String,
        max_tokens: u32,
        log: Arc<ConversationLog>,
        roster: Arc<AgentRoster>,
        dedup: DuplicateDetector,
        tools: InteractionTools,
        lessons: Arc<LessonStore>,
        profile: Arc<ProfileStore>,
        execution_catalog: Vec<(String, String)>,
    ) -> Self {
        Self {
            client,
            model,
            max_tokens,
            log,
            roster,
            dedup: Mutex::new(dedup),
            tools,
            lessons,
            profile,
            execution_catalog,
            reminder_parser: ReminderMessageParser::new(),
            known_tools: interaction_tool_names(),
        }
    }

    /// Handle a user-authored message.
    pub async fn handle_user_message(&self, user_message: &str) -> InteractionResult {
        info!(
            preview = %preview(user_message),
            length = user_message.len(),
            "processing user message"
        );

        if self
            .dedup
            .lock()
            .unwrap()
            .check_and_mark(user_message, Role::User)
        {
            info!("duplicate user message, skipping processing");
            return InteractionResult::swallowed();
        }

        self.run_turn(user_message, TurnKind::User).await
    }

    /// Handle a status update emitted by an execution agent.
    pub async fn handle_agent_message(&self, agent_message: &str) -> InteractionResult {
        info!(preview = %preview(agent_message), "processing agent message");

        if self
            .dedup
            .lock()
            .unwrap()
            .check_and_mark(agent_message, Role::ExecutionAgent)
        {
            info!("duplicate agent message, skipping processing");
            return InteractionResult::swallowed();
        }

        // Reminder traffic is formulaic; answer without an LLM round-trip.
        let parsed = self.reminder_parser.parse(agent_message);
        let canned = match parsed.message_type {
            ReminderMessageType::Notification => {
                Some(self.reminder_parser.format_notification(&parsed))
            }
            ReminderMessageType::Creation => Some(self.reminder_parser.format_creation(&parsed)),
            ReminderMessageType::General => Some(self.reminder_parser.format_general(&parsed)),
            ReminderMessageType::None => None,
        };
        if let Some(reply) = canned {
            if let Err(e) = self.log.record_reply(&reply).await {
                error!(error = %e, "failed to record reminder reply");
            }
            return InteractionResult {
                success: true,
                response: reply,
                error: None,
                execution_agents_used: 1,
            };
        }

        self.run_turn(agent_message, TurnKind::Agent).await
    }

    async fn run_turn(&self, latest_text: &str, kind: TurnKind) -> InteractionResult {
        match self.run_turn_inner(latest_text, kind).await {
            Ok(result) => result,
            Err(e) => {
                let error_text = match &e {
                    AgentError::Json(inner) => format!("JSON parsing failed: {inner}"),
                    AgentError::InvalidData(inner) => format!("Invalid data: {inner}"),
                    other => other.to_string(),
                };
                match &e {
                    AgentError::Json(_) | AgentError::InvalidData(_) => {
                        warn!(error = %error_text, "interaction turn rejected input")
                    }
                    _ => error!(error = %error_text, "interaction turn failed"),
                }
                InteractionResult::failure(error_text)
            }
        }
    }

    async fn run_turn_inner(&self, latest_text: &str, kind: TurnKind) -> Result<InteractionResult> {
        // Snapshot the transcript before recording, so the prompt reads as
        // "here is history + here is the new message".
        let transcript_before = self.log.load_transcript().await?;
        match kind {
            TurnKind::User => self.log.record_user_message(latest_text).await?,
            TurnKind::Agent => self.log.record_agent_message(latest_text).await?,
        }

        let system = build_system_prompt(
            &self.execution_catalog,
            &self.lessons,
            &self.profile.load(),
        );
        self.roster.load();
        let messages =
            prepare_message_with_history(latest_text, &transcript_before, &self.roster.agents(), kind);

        debug!("starting interaction loop");
        let summary = self.run_interaction_loop(system, messages).await?;

        let mut final_response = if let Some(last) = summary.user_messages.last() {
            last.clone()
        } else {
            summary.last_assistant_text.clone()
        };

        if !final_response.is_empty() {
            if self.should_emit_assistant_reply(&final_response) {
                if summary.user_messages.is_empty() {
                    self.log.record_reply(&final_response).await?;
                }
            } else {
                final_response = String::new();
            }
        }

        Ok(InteractionResult {
            success: true,
            response: final_response,
            error: None,
            execution_agents_used: summary.execution_agents.len(),
        })
    }

    async fn run_interaction_loop(
        &self,
        system: String,
        mut messages: Vec<Value>,
    ) -> Result<LoopSummary> {
        let mut summary = LoopSummary::default();
        let schemas = interaction_tool_schemas();

        for _iteration in 0..MAX_TOOL_ITERATIONS {
            let turn = self
                .client
                .chat_completion(&ChatRequest {
                    model: self.model.clone(),
                    system: system.clone(),
                    messages: messages.clone(),
                    tools: schemas.clone(),
                    max_tokens: self.max_tokens,
                })
                .await?;

            let content = turn.content.trim();
            if !content.is_empty() {
                summary.last_assistant_text = content.to_string();
            }

            let parsed = parse_tool_calls(&turn.tool_calls, &self.known_tools);
            messages.push(assistant_entry(&turn));

            if parsed.is_empty() {
                if summary.user_messages.is_empty() && summary.last_assistant_text.is_empty() {
                    warn!("interaction loop exited without assistant content");
                }
                return Ok(summary);
            }

            // Unlike execution agents, the interaction loop may run several
            // tools per step, strictly in order.
            for call in &parsed {
                if call.name == "send_message_to_agent" {
                    if let Some(agent_name) = call.arguments.get("agent_name").and_then(Value::as_str)
                    {
                        if !agent_name.is_empty() {
                            summary.execution_agents.insert(agent_name.to_string());
                        }
                    }
                }

                let result = match call.invalid_reason() {
                    Some(reason) => {
                        warn!(tool = %call.name, reason = %preview(reason), "tool call rejected");
                        tools::InteractionToolResult {
                            success: false,
                            payload: serde_json::json!({"error": reason}),
                            user_message: None,
                            recorded_reply: false,
                        }
                    }
                    None => {
                        debug!(tool = %call.name, "executing interaction tool");
                        self.tools.handle(call).await
                    }
                };

                if let Some(user_message) = &result.user_message {
                    summary.user_messages.push(user_message.clone());
                }

                let envelope = format_tool_result(
                    &call.name,
                    result.success,
                    &result.payload,
                    &call.cleaned_arguments(),
                );
                messages.push(tool_message(call, envelope));
            }
        }

        Err(AgentError::IterationLimit)
    }

    /// True when `reply` is non-empty and not a recent assistant-side
    /// duplicate; a hit marks the reply seen either way.
    fn should_emit_assistant_reply(&self, reply: &str) -> bool {
        if reply.trim().is_empty() {
            return false;
        }
        if self
            .dedup
            .lock()
            .unwrap()
            .check_and_mark(reply, Role::Assistant)
        {
            warn!(preview = %preview(reply), "duplicate assistant reply suppressed");
            return false;
        }
        true
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(100) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ExecutionDispatcher;
    use crate::journal::AgentJournal;
    use crate::llm::{AssistantTurn, LlmError};
    use alyn_core::outbound::NullTransport;
    use alyn_triggers::TriggerStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct ScriptedClient {
        calls: AtomicUsize,
        script: Box<dyn Fn(usize) -> AssistantTurn + Send + Sync>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedClient {
        fn new(script: impl Fn(usize) -> AssistantTurn + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: Box::new(script),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        async fn chat_completion(&self, req: &ChatRequest) -> std::result::Result<AssistantTurn, LlmError> {
            self.requests.lock().unwrap().push(req.clone());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((self.script)(n))
        }
    }

    fn tool_call_json(name: &str, args: Value) -> Value {
        serde_json::json!({
            "id": "call_1",
            "function": {"name": name, "arguments": args},
        })
    }

    struct Fixture {
        runtime: InteractionRuntime,
        log: Arc<ConversationLog>,
        roster: Arc<AgentRoster>,
        _events_rx: mpsc::Receiver<alyn_core::types::AgentEvent>,
        _dir: tempfile::TempDir,
    }

    fn fixture(client: Arc<ScriptedClient>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(ConversationLog::new(
            dir.path().join("alyn.log"),
            chrono_tz::Tz::UTC,
        ));
        let roster = Arc::new(AgentRoster::new(dir.path().join("roster.json")));
        let journal = Arc::new(AgentJournal::new(
            dir.path().join("agents"),
            chrono_tz::Tz::UTC,
        ));
        let lessons = Arc::new(LessonStore::open_in_memory().unwrap());
        let profile = Arc::new(ProfileStore::new(dir.path().join("profile.json")));
        let (events_tx, events_rx) = mpsc::channel(16);

        // Execution agents resolve instantly with a canned reply.
        let execution_client = ScriptedClient::new(|_| AssistantTurn {
            content: "Fait.".to_string(),
            tool_calls: vec![],
        });
        let dispatcher = ExecutionDispatcher::new(
            execution_client,
            journal.clone(),
            Arc::new(TriggerStore::open_in_memory().unwrap()),
            "exec-model".to_string(),
            512,
            "UTC".to_string(),
            events_tx,
        );

        let tools = InteractionTools::new(
            log.clone(),
            roster.clone(),
            journal,
            dispatcher,
            Arc::new(NullTransport),
            lessons.clone(),
        );

        let runtime = InteractionRuntime::new(
            client,
            "test-model".to_string(),
            512,
            log.clone(),
            roster.clone(),
            DuplicateDetector::new(100, Duration::from_secs(60)),
            tools,
            lessons,
            profile,
            vec![],
        );

        Fixture {
            runtime,
            log,
            roster,
            _events_rx: events_rx,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn echoed_user_message_is_swallowed() {
        let client = ScriptedClient::new(|_| AssistantTurn {
            content: "Salut !".to_string(),
            tool_calls: vec![],
        });
        let f = fixture(client.clone());

        let first = f.runtime.handle_user_message("Hello").await;
        assert!(first.success);
        assert_eq!(first.response, "Salut !");
        let entries_after_first = f.log.entries().await.unwrap().len();

        let second = f.runtime.handle_user_message("hello ").await;
        assert!(second.success);
        assert_eq!(second.response, "");
        assert_eq!(second.execution_agents_used, 0);

        // The duplicate produced no LLM call and no new log entries.
        assert_eq!(client.call_count(), 1);
        assert_eq!(f.log.entries().await.unwrap().len(), entries_after_first);
    }

    #[tokio::test]
    async fn agent_dispatch_updates_roster_and_counts() {
        let client = ScriptedClient::new(|n| {
            if n == 0 {
                AssistantTurn {
                    content: String::new(),
                    tool_calls: vec![tool_call_json(
                        "send_message_to_agent",
                        serde_json::json!({
                            "agent_name": "Email to John",
                            "instructions": "Tell John the meeting moved to 3pm tomorrow",
                        }),
                    )],
                }
            } else {
                AssistantTurn {
                    content: "Je m'en occupe.".to_string(),
                    tool_calls: vec![],
                }
            }
        });
        let f = fixture(client);

        let result = f
            .runtime
            .handle_user_message("Email John that the meeting is moved to 3pm tomorrow")
            .await;

        assert!(result.success);
        assert_eq!(result.execution_agents_used, 1);
        assert_eq!(result.response, "Je m'en occupe.");
        assert!(f.roster.has_agent("Email to John"));

        // The reply was recorded lazily after the loop.
        let entries = f.log.entries().await.unwrap();
        assert!(entries
            .iter()
            .any(|e| e.tag == "alyn_reply" && e.payload == "Je m'en occupe."));
    }

    #[tokio::test]
    async fn concatenated_tool_name_feeds_rejection_back() {
        let client = ScriptedClient::new(|n| {
            if n == 0 {
                AssistantTurn {
                    content: String::new(),
                    tool_calls: vec![tool_call_json("send_message_to_usersend_draft", Value::Null)],
                }
            } else {
                AssistantTurn {
                    content: "ok".to_string(),
                    tool_calls: vec![],
                }
            }
        });
        let f = fixture(client.clone());

        let result = f.runtime.handle_user_message("hi there friend").await;
        assert!(result.success);
        assert_eq!(result.response, "ok");

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let follow_up = serde_json::to_string(&requests[1].messages).unwrap();
        assert!(follow_up.contains("CRITICAL ERROR"));
        assert!(follow_up.contains("send_message_to_user, send_draft"));

        // Nothing was delivered or recorded by the rejected call.
        let entries = f.log.entries().await.unwrap();
        assert_eq!(
            entries.iter().filter(|e| e.tag == "alyn_reply").count(),
            1 // only the lazily recorded "ok"
        );
    }

    #[tokio::test]
    async fn wait_entry_is_logged_but_hidden_from_chat() {
        let client = ScriptedClient::new(|n| {
            if n == 0 {
                AssistantTurn {
                    content: String::new(),
                    tool_calls: vec![tool_call_json(
                        "wait",
                        serde_json::json!({"reason": "draft already sent"}),
                    )],
                }
            } else {
                AssistantTurn {
                    content: String::new(),
                    tool_calls: vec![],
                }
            }
        });
        let f = fixture(client);

        let result = f.runtime.handle_user_message("did you send it?").await;
        assert!(result.success);
        assert_eq!(result.response, "");

        let entries = f.log.entries().await.unwrap();
        assert!(entries
            .iter()
            .any(|e| e.tag == "wait" && e.payload == "draft already sent"));

        let chat = f.log.to_chat_messages().await.unwrap();
        assert!(chat.iter().all(|m| m.content != "draft already sent"));

        let transcript = f.log.load_transcript().await.unwrap();
        assert!(transcript.contains("draft already sent"));
    }

    #[tokio::test]
    async fn reminder_notification_short_circuits_the_llm() {
        let client = ScriptedClient::new(|_| {
            panic!("the reminder path must not call the LLM");
        });
        let f = fixture(client);

        let result = f
            .runtime
            .handle_agent_message("[SUCCESS] Rappels personnels : Boire de l'eau")
            .await;

        assert!(result.success);
        assert_eq!(result.response, "Boire de l'eau");
        assert_eq!(result.execution_agents_used, 1);

        let entries = f.log.entries().await.unwrap();
        assert!(entries
            .iter()
            .any(|e| e.tag == "alyn_reply" && e.payload == "Boire de l'eau"));
    }

    #[tokio::test]
    async fn repeated_assistant_reply_is_suppressed() {
        let client = ScriptedClient::new(|_| AssistantTurn {
            content: "Même réponse".to_string(),
            tool_calls: vec![],
        });
        let f = fixture(client);

        let first = f.runtime.handle_user_message("question one").await;
        assert_eq!(first.response, "Même réponse");

        let second = f.runtime.handle_user_message("question two").await;
        assert!(second.success);
        assert_eq!(second.response, "");

        let entries = f.log.entries().await.unwrap();
        assert_eq!(entries.iter().filter(|e| e.tag == "alyn_reply").count(), 1);
    }
}
