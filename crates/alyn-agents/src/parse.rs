//! Normalisation of raw LLM tool-call payloads.
//!
//! LLMs routinely fuse tool names (`send_message_to_usersend_draft`) or
//! invent tools outright. Silent drops confuse the model, so pathological
//! calls are kept and tagged with a structured rejection under
//! `__invalid_arguments__`; the executor surfaces the rejection back to
//! the LLM instead of invoking anything.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::warn;

/// Reserved argument key carrying a human-readable rejection reason.
pub const INVALID_ARGUMENTS_KEY: &str = "__invalid_arguments__";

/// Separators tolerated between fused tool-name components.
const NAME_SEPARATORS: [char; 4] = ['_', ' ', '-', '+'];

/// A normalised tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Opaque id from the LLM, echoed back in the tool-role message.
    pub id: Option<String>,
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    fn rejected(id: Option<String>, name: &str, reason: String) -> Self {
        let mut arguments = Map::new();
        arguments.insert(INVALID_ARGUMENTS_KEY.to_string(), Value::String(reason));
        Self {
            id,
            name: name.to_string(),
            arguments,
        }
    }

    /// The rejection reason, when this call must not be executed.
    pub fn invalid_reason(&self) -> Option<&str> {
        self.arguments.get(INVALID_ARGUMENTS_KEY).and_then(Value::as_str)
    }

    /// Arguments without the reserved rejection key, for logging.
    pub fn cleaned_arguments(&self) -> Map<String, Value> {
        self.arguments
            .iter()
            .filter(|(k, _)| k.as_str() != INVALID_ARGUMENTS_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Greedy longest-match left-to-right decomposition of a fused tool name.
///
/// Between components a single separator character is tolerated, but never
/// at the very start. Returns the component list only when `name` splits
/// into two or more known tools; a single exact match or any unmatched
/// residue yields an empty vec.
pub fn split_known_tools(name: &str, known_tools: &HashSet<String>) -> Vec<String> {
    let mut sorted: Vec<&str> = known_tools.iter().map(String::as_str).collect();
    sorted.sort_by_key(|t| std::cmp::Reverse(t.len()));

    let mut remaining = name;
    let mut components: Vec<String> = Vec::new();

    while !remaining.is_empty() {
        if !components.is_empty() {
            if let Some(rest) = remaining.strip_prefix(|c: char| NAME_SEPARATORS.contains(&c)) {
                remaining = rest;
                if remaining.is_empty() {
                    break;
                }
            }
        }
        let Some(tool) = sorted
            .iter()
            .find(|t| !t.is_empty() && remaining.starts_with(**t))
        else {
            return Vec::new();
        };
        components.push(tool.to_string());
        remaining = &remaining[tool.len()..];
    }

    if components.len() >= 2 {
        components
    } else {
        Vec::new()
    }
}

/// Parse raw tool-call objects (`{id, function: {name, arguments}}`) into
/// [`ToolCall`]s, applying the validation rules in order: name presence,
/// concatenation detection, registry membership, argument decoding.
pub fn parse_tool_calls(raw_tool_calls: &[Value], known_tools: &HashSet<String>) -> Vec<ToolCall> {
    let mut parsed = Vec::new();

    for raw in raw_tool_calls {
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let function = raw.get("function").cloned().unwrap_or(Value::Null);
        let name = function.get("name").and_then(Value::as_str).unwrap_or("");

        if name.is_empty() {
            warn!(tool = %raw, "skipping tool call without name");
            continue;
        }

        let components = split_known_tools(name, known_tools);
        if !components.is_empty() {
            warn!(tool = name, components = ?components, "tool call combined multiple tools");
            parsed.push(ToolCall::rejected(
                id,
                &components[0],
                format!(
                    "CRITICAL ERROR: You attempted to call multiple tools in a single invocation. \
                     The tool name '{name}' is invalid because it combines these tools: {}. \
                     You MUST call each tool separately in its own tool invocation. \
                     Make separate calls for: {}.",
                    components.join(", "),
                    components.join(" and "),
                ),
            ));
            continue;
        }

        if !known_tools.contains(name) {
            warn!(tool = name, "tool call for unknown tool");
            parsed.push(ToolCall::rejected(
                id,
                name,
                format!("ERROR: Unknown tool '{name}'. Please use only the tools provided in your schema."),
            ));
            continue;
        }

        match parse_arguments(function.get("arguments")) {
            Ok(arguments) => parsed.push(ToolCall {
                id,
                name: name.to_string(),
                arguments,
            }),
            Err(error) => {
                warn!(tool = name, error = %error, "tool call arguments invalid");
                parsed.push(ToolCall::rejected(id, name, error));
            }
        }
    }

    parsed
}

fn parse_arguments(raw: Option<&Value>) -> std::result::Result<Map<String, Value>, String> {
    match raw {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::String(s)) => {
            if s.trim().is_empty() {
                return Ok(Map::new());
            }
            match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(other) => Err(format!(
                    "Invalid JSON arguments: expected an object, got {other}"
                )),
                Err(e) => Err(format!("Invalid JSON arguments: {e}")),
            }
        }
        Some(other) => Err(format!(
            "Invalid JSON arguments: expected an object, got {other}"
        )),
    }
}
