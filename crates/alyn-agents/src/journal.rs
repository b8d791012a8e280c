//! Per-agent execution journals.
//!
//! Every execution agent owns one line-delimited log file under
//! `<data>/execution_agents/`, sharing the conversation log's wire format.
//! The journal is both the audit trail and the agent's memory: its
//! transcript is embedded in the agent's system prompt on the next run.

use std::path::PathBuf;

use chrono_tz::Tz;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, warn};

use alyn_conversation::log::{escape_text, format_line, parse_line};

use crate::error::Result;

/// Longest tool-argument preview recorded in an `action` entry.
const ACTION_ARGS_PREVIEW: usize = 200;
/// Longest tool result recorded in a `tool_response` entry.
const TOOL_RESPONSE_PREVIEW: usize = 500;

pub struct AgentJournal {
    dir: PathBuf,
    timezone: Tz,
    lock: Mutex<()>,
}

/// Map an agent display name to a safe file stem.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "agent".to_string()
    } else {
        cleaned
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

impl AgentJournal {
    pub fn new(dir: PathBuf, timezone: Tz) -> Self {
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(error = %e, "agent journal directory creation failed");
        }
        Self {
            dir,
            timezone,
            lock: Mutex::new(()),
        }
    }

    fn path_for(&self, agent_name: &str) -> PathBuf {
        self.dir.join(format!("{}.log", sanitize_name(agent_name)))
    }

    fn now_timestamp(&self) -> String {
        chrono::Utc::now()
            .with_timezone(&self.timezone)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    async fn append(&self, agent_name: &str, tag: &str, payload: &str) -> Result<()> {
        let line = format_line(tag, &self.now_timestamp(), payload);
        let path = self.path_for(agent_name);
        let _guard = self.lock.lock().await;
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            Ok::<(), std::io::Error>(())
        }
        .await;
        if let Err(e) = result {
            error!(error = %e, agent = agent_name, tag, "agent journal append failed");
            return Err(e.into());
        }
        Ok(())
    }

    /// Record an incoming instruction from the interaction agent.
    pub async fn record_request(&self, agent_name: &str, instructions: &str) -> Result<()> {
        self.append(agent_name, "agent_request", instructions).await
    }

    /// Record the agent's final textual response.
    pub async fn record_response(&self, agent_name: &str, response: &str) -> Result<()> {
        self.append(agent_name, "agent_response", response).await
    }

    /// Record a free-form action note (tool invocations, failures).
    pub async fn record_action(&self, agent_name: &str, description: &str) -> Result<()> {
        self.append(agent_name, "action", description).await
    }

    /// Record a tool invocation plus its (truncated) result.
    pub async fn record_tool_execution(
        &self,
        agent_name: &str,
        tool_name: &str,
        arguments: &str,
        result: &str,
    ) -> Result<()> {
        self.record_action(
            agent_name,
            &format!(
                "Calling {tool_name} with: {}",
                truncate(arguments, ACTION_ARGS_PREVIEW)
            ),
        )
        .await?;
        self.append(
            agent_name,
            "tool_response",
            &format!("{tool_name}: {}", truncate(result, TOOL_RESPONSE_PREVIEW)),
        )
        .await
    }

    /// The agent's full history as an XML-like transcript, empty when the
    /// agent has never run.
    pub async fn load_transcript(&self, agent_name: &str) -> Result<String> {
        let path = self.path_for(agent_name);
        let text = {
            let _guard = self.lock.lock().await;
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(e) => {
                    error!(error = %e, agent = agent_name, "agent journal read failed");
                    return Err(e.into());
                }
            }
        };
        let parts: Vec<String> = text
            .lines()
            .filter_map(parse_line)
            .map(|entry| {
                format!(
                    "<{tag} timestamp=\"{ts}\">{payload}</{tag}>",
                    tag = entry.tag,
                    ts = entry.timestamp,
                    payload = escape_text(&entry.payload)
                )
            })
            .collect();
        Ok(parts.join("\n"))
    }

    /// Delete the agent's journal file, if any.
    pub async fn remove(&self, agent_name: &str) -> Result<()> {
        let path = self.path_for(agent_name);
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keep only the most recent `limit` requests of a transcript, measured by
/// `<agent_request` lines. Older context is dropped wholesale.
pub fn trim_transcript_to_requests(transcript: &str, limit: usize) -> String {
    if limit == 0 {
        return transcript.to_string();
    }
    let lines: Vec<&str> = transcript.lines().collect();
    let request_count = lines
        .iter()
        .filter(|l| l.contains("<agent_request"))
        .count();
    if request_count <= limit {
        return transcript.to_string();
    }

    let mut kept = 0usize;
    let mut cutoff = lines.len();
    for (i, line) in lines.iter().enumerate().rev() {
        if line.contains("<agent_request") {
            kept += 1;
            if kept == limit {
                cutoff = i;
                break;
            }
        }
    }
    lines[cutoff..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn journal() -> (tempfile::TempDir, AgentJournal) {
        let dir = tempfile::tempdir().unwrap();
        let journal = AgentJournal::new(dir.path().to_path_buf(), Tz::UTC);
        (dir, journal)
    }

    #[tokio::test]
    async fn transcript_replays_requests_and_responses() {
        let (_dir, journal) = journal();
        journal
            .record_request("Email to John", "Send the update")
            .await
            .unwrap();
        journal
            .record_tool_execution("Email to John", "createTrigger", "{\"payload\":\"x\"}", "ok")
            .await
            .unwrap();
        journal
            .record_response("Email to John", "Done")
            .await
            .unwrap();

        let transcript = journal.load_transcript("Email to John").await.unwrap();
        assert!(transcript.contains("<agent_request "));
        assert!(transcript.contains("Send the update"));
        assert!(transcript.contains("Calling createTrigger"));
        assert!(transcript.contains("<agent_response "));
    }

    #[tokio::test]
    async fn agent_names_map_to_safe_files() {
        let (dir, journal) = journal();
        journal
            .record_request("Email to John / Q3!", "hi")
            .await
            .unwrap();
        assert!(dir.path().join("email_to_john___q3_.log").exists());
    }

    #[tokio::test]
    async fn remove_deletes_history() {
        let (_dir, journal) = journal();
        journal.record_request("Mailer", "hi").await.unwrap();
        journal.remove("Mailer").await.unwrap();
        assert_eq!(journal.load_transcript("Mailer").await.unwrap(), "");
        // Removing an absent journal is not an error.
        journal.remove("Mailer").await.unwrap();
    }

    #[test]
    fn trim_keeps_only_recent_requests() {
        let mut transcript = String::new();
        for i in 0..5 {
            transcript.push_str(&format!("<agent_request timestamp=\"t\">req {i}</agent_request>\n"));
            transcript.push_str(&format!("<agent_response timestamp=\"t\">resp {i}</agent_response>\n"));
        }
        let trimmed = trim_transcript_to_requests(transcript.trim_end(), 2);
        assert!(!trimmed.contains("req 2"));
        assert!(trimmed.contains("req 3"));
        assert!(trimmed.contains("req 4"));
        assert!(trimmed.contains("resp 4"));
    }
}
