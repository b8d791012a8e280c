//! Execution agent runtime: a bounded LLM → tool → LLM loop.
//!
//! The loop stops on the first of: a turn with no tool calls, a plan
//! repeated `REPEATED_PLAN_THRESHOLD` times, a tool invocation identical
//! to one already executed this run, or the iteration limit. Limiting each
//! step to a single tool call keeps side-effecting tools strictly ordered.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use alyn_core::types::ExecutionResult;

use crate::error::{AgentError, Result};
use crate::journal::{trim_transcript_to_requests, AgentJournal};
use crate::llm::{AssistantTurn, ChatClient, ChatRequest};
use crate::parse::{parse_tool_calls, ToolCall};
use crate::tools::ToolRegistry;

pub const MAX_TOOL_ITERATIONS: usize = 5;
const REPEATED_PLAN_THRESHOLD: u32 = 2;

const SYSTEM_PROMPT_TEMPLATE: &str = "\
You are '{agent_name}', an execution agent responsible for completing a specific task using the tools available to you.

Purpose: handle tasks related to: {agent_name}.

When given instructions:
1. Analyze what needs to be done.
2. Use the appropriate tools to complete the task, one call at a time.
3. When the task is complete, reply with a clear status update. That final text is reported back to the assistant, so keep it short and factual.

Never invent tools. If a tool fails, report the failure instead of retrying the identical call.";

const REMINDER_INSTRUCTIONS: &str = "\
When you receive a trigger firing notification with reminder content in the payload:
1. Simply acknowledge the reminder by returning the payload text as your final response.
2. Do not create new triggers, call tools, or perform any other actions.
3. Keep your response clear and concise - just the reminder content.";

/// Runs one named agent against one instruction.
pub struct ExecutionRuntime {
    agent_name: String,
    model: String,
    max_tokens: u32,
    client: Arc<dyn ChatClient>,
    registry: ToolRegistry,
    journal: Arc<AgentJournal>,
    /// Cap on past requests embedded in the system prompt; `None` = all.
    conversation_limit: Option<usize>,
}

impl ExecutionRuntime {
    pub fn new(
        agent_name: String,
        model: String,
        max_tokens: u32,
        client: Arc<dyn ChatClient>,
        registry: ToolRegistry,
        journal: Arc<AgentJournal>,
        conversation_limit: Option<usize>,
    ) -> Self {
        Self {
            agent_name,
            model,
            max_tokens,
            client,
            registry,
            journal,
            conversation_limit,
        }
    }

    /// Run the agent. Errors are folded into a failed [`ExecutionResult`];
    /// the journal records the outcome either way.
    pub async fn execute(&self, instructions: &str) -> ExecutionResult {
        match self.run(instructions).await {
            Ok((response, tools_executed)) => {
                if let Err(e) = self.journal.record_response(&self.agent_name, &response).await {
                    warn!(agent = %self.agent_name, error = %e, "failed to journal agent response");
                }
                ExecutionResult {
                    agent_name: self.agent_name.clone(),
                    success: true,
                    response,
                    error: None,
                    tools_executed,
                }
            }
            Err(e) => {
                error!(agent = %self.agent_name, error = %e, "execution failed");
                let message = e.to_string();
                if let Err(je) = self
                    .journal
                    .record_response(&self.agent_name, &format!("Error: {message}"))
                    .await
                {
                    warn!(agent = %self.agent_name, error = %je, "failed to journal agent error");
                }
                ExecutionResult::failure(&self.agent_name, message)
            }
        }
    }

    async fn run(&self, instructions: &str) -> Result<(String, Vec<String>)> {
        let system = self.build_system_prompt().await?;
        let known_tools = self.registry.known_names();
        let schemas = self.registry.schemas();

        let mut messages: Vec<Value> = vec![serde_json::json!({
            "role": "user",
            "content": instructions,
        })];
        let mut tools_executed: Vec<String> = Vec::new();
        let mut plan_counts: HashMap<String, u32> = HashMap::new();
        let mut executed_signatures: HashSet<String> = HashSet::new();

        for iteration in 0..MAX_TOOL_ITERATIONS {
            info!(agent = %self.agent_name, iteration = iteration + 1, "requesting plan");
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

            let mut parsed = parse_tool_calls(&turn.tool_calls, &known_tools);
            // One tool per step: anything beyond the first call is dropped
            // so side effects keep a defined order.
            if parsed.len() > 1 {
                warn!(
                    agent = %self.agent_name,
                    dropped = ?parsed[1..].iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                    "multiple tool calls in one step, keeping only the first"
                );
                parsed.truncate(1);
            }

            messages.push(assistant_entry(&turn));

            let plan_sig = plan_signature(&turn.content, &parsed);
            let count = plan_counts.entry(plan_sig).or_insert(0);
            *count += 1;
            if *count >= REPEATED_PLAN_THRESHOLD {
                info!(agent = %self.agent_name, iterations = iteration + 1, "repeated plan detected, terminating early");
                let response = non_empty_or(&turn.content, "Plan repeated; no further action taken.");
                return Ok((response, tools_executed));
            }

            if parsed.is_empty() {
                let response = non_empty_or(&turn.content, "No action required.");
                return Ok((response, tools_executed));
            }

            let call = &parsed[0];

            if let Some(reason) = call.invalid_reason() {
                let envelope = format_tool_result(
                    &call.name,
                    false,
                    &serde_json::json!({"error": reason}),
                    &call.cleaned_arguments(),
                );
                messages.push(tool_message(call, envelope));
                continue;
            }

            let signature = tool_signature(call);
            if executed_signatures.contains(&signature) {
                info!(agent = %self.agent_name, tool = %call.name, "identical tool invocation detected, ending execution early");
                let response = non_empty_or(&turn.content, "Repeated tool invocation; stopping.");
                return Ok((response, tools_executed));
            }
            executed_signatures.insert(signature);
            tools_executed.push(call.name.clone());

            info!(agent = %self.agent_name, tool = %call.name, "executing tool");
            let (success, result) = self.run_tool(call).await;

            let args_json =
                serde_json::to_string(&Value::Object(call.arguments.clone())).unwrap_or_default();
            let result_json = serde_json::to_string(&result).unwrap_or_default();
            if let Err(e) = self
                .journal
                .record_tool_execution(&self.agent_name, &call.name, &args_json, &result_json)
                .await
            {
                warn!(agent = %self.agent_name, error = %e, "failed to journal tool execution");
            }

            let envelope = format_tool_result(&call.name, success, &result, &call.arguments);
            messages.push(tool_message(call, envelope));
        }

        Err(AgentError::IterationLimit)
    }

    async fn run_tool(&self, call: &ToolCall) -> (bool, Value) {
        let Some(tool) = self.registry.get(&call.name) else {
            return (
                false,
                serde_json::json!({"error": format!("Unknown tool: {}", call.name)}),
            );
        };
        match tool.invoke(&call.arguments).await {
            Ok(result) => (true, result),
            Err(message) => {
                error!(agent = %self.agent_name, tool = %call.name, error = %message, "tool execution error");
                (false, serde_json::json!({"error": message}))
            }
        }
    }

    /// Persona + tool catalog + the agent's own history.
    async fn build_system_prompt(&self) -> Result<String> {
        let mut prompt = SYSTEM_PROMPT_TEMPLATE.replace("{agent_name}", &self.agent_name);

        if !self.registry.is_empty() {
            let mut section = String::from("\n\n# Available Tools\n");
            for (name, description) in self.registry.catalog() {
                section.push_str(&format!("\n- {name} — {description}"));
            }
            prompt.push_str(&section);
        }

        if is_reminder_agent(&self.agent_name) {
            prompt.push_str("\n\n# Reminder Handling\n\n");
            prompt.push_str(REMINDER_INSTRUCTIONS);
        }

        let mut transcript = self.journal.load_transcript(&self.agent_name).await?;
        if let Some(limit) = self.conversation_limit {
            transcript = trim_transcript_to_requests(&transcript, limit);
        }
        if !transcript.is_empty() {
            prompt.push_str("\n\n# Execution History\n\n");
            prompt.push_str(&transcript);
        }

        Ok(prompt)
    }
}

fn is_reminder_agent(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("rappel") || lower.contains("remind")
}

fn non_empty_or(content: &str, fallback: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

pub(crate) fn assistant_entry(turn: &AssistantTurn) -> Value {
    let mut entry = serde_json::json!({
        "role": "assistant",
        "content": turn.content,
    });
    if !turn.tool_calls.is_empty() {
        entry["tool_calls"] = Value::Array(turn.tool_calls.clone());
    }
    entry
}

pub(crate) fn tool_message(call: &ToolCall, content: String) -> Value {
    serde_json::json!({
        "role": "tool",
        "tool_call_id": call.id.clone().unwrap_or_else(|| call.name.clone()),
        "content": content,
    })
}

/// Canonical JSON of the assistant text plus the planned tool calls.
/// `serde_json::Map` orders keys, so equal plans serialize identically.
fn plan_signature(content: &str, calls: &[ToolCall]) -> String {
    let tools: Vec<Value> = calls
        .iter()
        .map(|c| {
            serde_json::json!({
                "name": c.name,
                "arguments": Value::Object(c.arguments.clone()),
            })
        })
        .collect();
    serde_json::to_string(&serde_json::json!({
        "content": content.trim(),
        "tools": tools,
    }))
    .unwrap_or_default()
}

fn tool_signature(call: &ToolCall) -> String {
    serde_json::to_string(&serde_json::json!({
        "name": call.name,
        "arguments": Value::Object(call.arguments.clone()),
    }))
    .unwrap_or_default()
}

/// JSON envelope appended as the tool-role message.
pub(crate) fn format_tool_result(
    tool_name: &str,
    success: bool,
    result: &Value,
    arguments: &Map<String, Value>,
) -> String {
    let payload = if success {
        serde_json::json!({
            "tool": tool_name,
            "status": "success",
            "arguments": Value::Object(arguments.clone()),
            "result": result,
        })
    } else {
        let detail = result
            .get("error")
            .cloned()
            .unwrap_or_else(|| result.clone());
        serde_json::json!({
            "tool": tool_name,
            "status": "error",
            "arguments": Value::Object(arguments.clone()),
            "error": detail,
        })
    };
    serde_json::to_string(&payload).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::tools::ExecutionTool;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// ChatClient whose nth call is produced by a script function.
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

    struct CountingTool {
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ExecutionTool for CountingTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the arguments back"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn invoke(&self, args: &Map<String, Value>) -> std::result::Result<Value, String> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Object(args.clone()))
        }
    }

    fn tool_call_json(name: &str, args: Value) -> Value {
        serde_json::json!({
            "id": "call_1",
            "function": {"name": name, "arguments": args},
        })
    }

    fn runtime(
        client: Arc<ScriptedClient>,
        invocations: Arc<AtomicUsize>,
        dir: &tempfile::TempDir,
    ) -> ExecutionRuntime {
        let registry = ToolRegistry::new(vec![Arc::new(CountingTool { invocations })]);
        let journal = Arc::new(AgentJournal::new(
            dir.path().to_path_buf(),
            chrono_tz::Tz::UTC,
        ));
        ExecutionRuntime::new(
            "Test Agent".to_string(),
            "test-model".to_string(),
            512,
            client,
            registry,
            journal,
            None,
        )
    }

    #[tokio::test]
    async fn plain_answer_finishes_in_one_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(|_| AssistantTurn {
            content: "All done".to_string(),
            tool_calls: vec![],
        });
        let invocations = Arc::new(AtomicUsize::new(0));
        let result = runtime(client.clone(), invocations, &dir)
            .execute("do the thing")
            .await;

        assert!(result.success);
        assert_eq!(result.response, "All done");
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn repeated_plan_terminates_after_two_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(|_| AssistantTurn {
            content: "sending".to_string(),
            tool_calls: vec![tool_call_json("echo", serde_json::json!({"x": 1}))],
        });
        let invocations = Arc::new(AtomicUsize::new(0));
        let result = runtime(client.clone(), invocations.clone(), &dir)
            .execute("do the thing")
            .await;

        assert!(result.success);
        assert_eq!(client.call_count(), 2);
        // The second, identical plan stops before executing again.
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(result.tools_executed, vec!["echo"]);
    }

    #[tokio::test]
    async fn identical_tool_signature_stops_without_reexecuting() {
        let dir = tempfile::tempdir().unwrap();
        // Content differs each turn, so the plan signatures differ; only
        // the tool signature repeats.
        let client = ScriptedClient::new(|n| AssistantTurn {
            content: format!("attempt {n}"),
            tool_calls: vec![tool_call_json("echo", serde_json::json!({"x": 1}))],
        });
        let invocations = Arc::new(AtomicUsize::new(0));
        let result = runtime(client.clone(), invocations.clone(), &dir)
            .execute("do the thing")
            .await;

        assert!(result.success);
        assert_eq!(client.call_count(), 2);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_tool_calls_exhaust_the_iteration_limit() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(|n| AssistantTurn {
            content: format!("attempt {n}"),
            tool_calls: vec![tool_call_json("echo", serde_json::json!({"step": n}))],
        });
        let invocations = Arc::new(AtomicUsize::new(0));
        let result = runtime(client.clone(), invocations.clone(), &dir)
            .execute("do the thing")
            .await;

        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("tool iteration limit"));
        assert_eq!(client.call_count(), MAX_TOOL_ITERATIONS);
        assert_eq!(invocations.load(Ordering::SeqCst), MAX_TOOL_ITERATIONS);
    }

    #[tokio::test]
    async fn concatenated_tool_name_is_rejected_not_executed() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(|n| {
            if n == 0 {
                AssistantTurn {
                    content: String::new(),
                    tool_calls: vec![tool_call_json("echoecho", Value::Null)],
                }
            } else {
                AssistantTurn {
                    content: "recovered".to_string(),
                    tool_calls: vec![],
                }
            }
        });
        let invocations = Arc::new(AtomicUsize::new(0));
        let result = runtime(client.clone(), invocations.clone(), &dir)
            .execute("do the thing")
            .await;

        assert!(result.success);
        assert_eq!(result.response, "recovered");
        assert_eq!(invocations.load(Ordering::SeqCst), 0);

        // The second request carries the structured rejection back to the LLM.
        let requests = client.requests.lock().unwrap();
        let follow_up = serde_json::to_string(&requests[1].messages).unwrap();
        assert!(follow_up.contains("CRITICAL ERROR"));
        assert!(follow_up.contains("\"role\":\"tool\""));
    }

    #[tokio::test]
    async fn only_first_of_multiple_tool_calls_runs() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(|n| {
            if n == 0 {
                AssistantTurn {
                    content: String::new(),
                    tool_calls: vec![
                        tool_call_json("echo", serde_json::json!({"first": true})),
                        tool_call_json("echo", serde_json::json!({"second": true})),
                    ],
                }
            } else {
                AssistantTurn {
                    content: "done".to_string(),
                    tool_calls: vec![],
                }
            }
        });
        let invocations = Arc::new(AtomicUsize::new(0));
        let result = runtime(client, invocations.clone(), &dir)
            .execute("do the thing")
            .await;

        assert!(result.success);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(result.tools_executed, vec!["echo"]);
    }

    #[tokio::test]
    async fn journal_history_is_embedded_in_the_system_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(|_| AssistantTurn {
            content: "ok".to_string(),
            tool_calls: vec![],
        });
        let invocations = Arc::new(AtomicUsize::new(0));
        let rt = runtime(client.clone(), invocations, &dir);
        rt.journal
            .record_request("Test Agent", "earlier instruction")
            .await
            .unwrap();

        rt.execute("new instruction").await;

        let requests = client.requests.lock().unwrap();
        assert!(requests[0].system.contains("# Execution History"));
        assert!(requests[0].system.contains("earlier instruction"));
    }
}
