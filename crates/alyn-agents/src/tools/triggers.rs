//! Trigger tools for execution agents: create, update, and list the
//! reminder triggers owned by the calling agent.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use alyn_triggers::{NewTrigger, TriggerRecord, TriggerStore, TriggerUpdate};

use super::ExecutionTool;

/// Most records returned by `listTriggers`.
const MAX_TRIGGER_EXPORT: usize = 10;
/// Longest payload summary embedded in tool results.
const MAX_PAYLOAD_SUMMARY: usize = 160;

/// Condense a trigger payload to avoid bloating LLM prompts.
fn summarize_payload(payload: &str) -> String {
    let normalized = payload.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.chars().count() <= MAX_PAYLOAD_SUMMARY {
        return normalized;
    }
    let cut: String = normalized.chars().take(MAX_PAYLOAD_SUMMARY - 1).collect();
    format!("{}…", cut.trim_end())
}

fn record_to_payload(record: &TriggerRecord) -> Value {
    let mut payload = Map::new();
    payload.insert("id".into(), record.id.into());
    payload.insert(
        "payload_summary".into(),
        summarize_payload(&record.payload).into(),
    );
    payload.insert("status".into(), record.status.to_string().into());
    if let Some(next) = &record.next_fire {
        payload.insert("next_fire".into(), next.clone().into());
    }
    payload.insert("start_time".into(), record.start_time.clone().into());
    if let Some(rule) = &record.recurrence_rule {
        payload.insert("recurrence_rule".into(), rule.clone().into());
    }
    if !record.timezone.is_empty() {
        payload.insert("timezone".into(), record.timezone.clone().into());
    }
    if let Some(error) = &record.last_error {
        payload.insert("last_error".into(), error.clone().into());
    }
    Value::Object(payload)
}

fn opt_string(args: &Map<String, Value>, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Build the trigger tool set bound to one agent.
pub fn build_trigger_tools(
    store: Arc<TriggerStore>,
    agent_name: &str,
    timezone: &str,
) -> Vec<Arc<dyn ExecutionTool>> {
    vec![
        Arc::new(CreateTriggerTool {
            store: store.clone(),
            agent_name: agent_name.to_string(),
            timezone: timezone.to_string(),
        }),
        Arc::new(UpdateTriggerTool {
            store: store.clone(),
            agent_name: agent_name.to_string(),
        }),
        Arc::new(ListTriggersTool {
            store,
            agent_name: agent_name.to_string(),
        }),
    ]
}

struct CreateTriggerTool {
    store: Arc<TriggerStore>,
    agent_name: String,
    timezone: String,
}

#[async_trait]
impl ExecutionTool for CreateTriggerTool {
    fn name(&self) -> &str {
        "createTrigger"
    }

    fn description(&self) -> &str {
        "Create a reminder trigger for the current execution agent."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "payload": {
                    "type": "string",
                    "description": "Raw instruction text that should run when the trigger fires.",
                },
                "recurrence_rule": {
                    "type": "string",
                    "description": "iCalendar RRULE string describing how often to fire (optional).",
                },
                "start_time": {
                    "type": "string",
                    "description": "ISO 8601 start time for the first firing. Defaults to now if omitted.",
                },
                "status": {
                    "type": "string",
                    "description": "Initial status; usually 'active' or 'paused'.",
                },
            },
            "required": ["payload"],
            "additionalProperties": false,
        })
    }

    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value, String> {
        let payload = opt_string(args, "payload")
            .ok_or_else(|| "payload is required".to_string())?;
        let record = self
            .store
            .create(NewTrigger {
                agent_name: self.agent_name.clone(),
                payload,
                recurrence_rule: opt_string(args, "recurrence_rule"),
                start_time: opt_string(args, "start_time"),
                timezone: self.timezone.clone(),
                status: opt_string(args, "status"),
            })
            .map_err(|e| e.to_string())?;

        let mut response = record_to_payload(&record);
        response["trigger_id"] = record.id.into();
        Ok(response)
    }
}

struct UpdateTriggerTool {
    store: Arc<TriggerStore>,
    agent_name: String,
}

#[async_trait]
impl ExecutionTool for UpdateTriggerTool {
    fn name(&self) -> &str {
        "updateTrigger"
    }

    fn description(&self) -> &str {
        "Update or pause an existing trigger owned by this execution agent."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "trigger_id": {
                    "type": "integer",
                    "description": "Identifier returned when the trigger was created.",
                },
                "payload": {
                    "type": "string",
                    "description": "Replace the instruction payload (optional).",
                },
                "recurrence_rule": {
                    "type": "string",
                    "description": "New RRULE definition (optional).",
                },
                "start_time": {
                    "type": "string",
                    "description": "New ISO 8601 start time for the schedule (optional).",
                },
                "status": {
                    "type": "string",
                    "description": "Set trigger status to 'active', 'paused', or 'completed'.",
                },
            },
            "required": ["trigger_id"],
            "additionalProperties": false,
        })
    }

    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value, String> {
        let trigger_id = args
            .get("trigger_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| "trigger_id must be an integer".to_string())?;

        let update = TriggerUpdate {
            payload: opt_string(args, "payload"),
            recurrence_rule: opt_string(args, "recurrence_rule"),
            start_time: opt_string(args, "start_time"),
            timezone: None,
            status: opt_string(args, "status"),
        };

        let record = self
            .store
            .update(trigger_id, &self.agent_name, update)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Trigger {trigger_id} not found"))?;

        let mut response = record_to_payload(&record);
        response["trigger_id"] = record.id.into();
        Ok(response)
    }
}

struct ListTriggersTool {
    store: Arc<TriggerStore>,
    agent_name: String,
}

#[async_trait]
impl ExecutionTool for ListTriggersTool {
    fn name(&self) -> &str {
        "listTriggers"
    }

    fn description(&self) -> &str {
        "List all triggers belonging to this execution agent."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": [],
            "additionalProperties": false,
        })
    }

    async fn invoke(&self, _args: &Map<String, Value>) -> Result<Value, String> {
        let records = self
            .store
            .list_for_agent(&self.agent_name)
            .map_err(|e| e.to_string())?;

        let summarized: Vec<Value> = records
            .iter()
            .take(MAX_TRIGGER_EXPORT)
            .map(record_to_payload)
            .collect();

        Ok(serde_json::json!({
            "triggers": summarized,
            "total": records.len(),
        }))
    }
}
