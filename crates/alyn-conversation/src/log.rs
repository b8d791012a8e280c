//! Append-only conversation log persisted to disk.
//!
//! One entry per line, `<tag timestamp="YYYY-MM-DD HH:MM:SS">payload</tag>`,
//! with newlines in the payload escaped as `\n` and `& < >` entity-encoded
//! so a line always round-trips. Append order is the only temporal truth.

use std::path::PathBuf;
use std::sync::Arc;

use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, warn};

use alyn_core::types::{ChatMessage, Role};

use crate::error::Result;

/// Entry kinds recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTag {
    UserMessage,
    AgentMessage,
    AlynReply,
    Wait,
}

impl EntryTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryTag::UserMessage => "user_message",
            EntryTag::AgentMessage => "agent_message",
            EntryTag::AlynReply => "alyn_reply",
            EntryTag::Wait => "wait",
        }
    }
}

/// One decoded log line.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub tag: String,
    pub timestamp: String,
    pub payload: String,
}

/// Callback fired after every successful append. Used to nudge the
/// working-memory summarizer; a panicking hook must not fail the append.
pub type AppendHook = Arc<dyn Fn() + Send + Sync>;

static ATTR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(\w+)\s*=\s*"([^"]*)""#).expect("attribute pattern"));

/// Append-only, line-delimited journal.
///
/// All file access serializes through one async lock: writers append whole
/// lines, readers snapshot the file, so a reader always sees a consistent
/// prefix of the append order.
pub struct ConversationLog {
    path: PathBuf,
    timezone: Tz,
    lock: Mutex<()>,
    append_hook: std::sync::Mutex<Option<AppendHook>>,
}

/// Escape a payload for single-line storage: CR-normalise, encode
/// newlines as `\n`, entity-encode `& < >`.
pub fn encode_payload(payload: &str) -> String {
    let normalized = payload.replace("\r\n", "\n").replace('\r', "\n");
    let collapsed = normalized.replace('\n', "\\n");
    collapsed
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Inverse of [`encode_payload`].
pub fn decode_payload(payload: &str) -> String {
    payload
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .replace("\\n", "\n")
}

/// Entity-encode without touching newlines, for transcript rendering.
pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render one journal line for `tag`.
pub fn format_line(tag: &str, timestamp: &str, payload: &str) -> String {
    let encoded = encode_payload(payload);
    format!("<{tag} timestamp=\"{timestamp}\">{encoded}</{tag}>\n")
}

/// Decode one journal line; `None` for anything malformed.
pub fn parse_line(line: &str) -> Option<LogEntry> {
    let stripped = line.trim();
    if !stripped.starts_with('<') || !stripped.contains("</") {
        return None;
    }
    let open_end = stripped.find('>')?;
    let open_tag_content = &stripped[1..open_end];
    let (tag, attr_string) = match open_tag_content.split_once(' ') {
        Some((tag, attrs)) => (tag, attrs),
        None => (open_tag_content, ""),
    };
    let close_start = stripped.rfind("</")?;
    let close_end = stripped.rfind('>')?;
    if close_end <= close_start + 1 {
        return None;
    }
    let closing_tag = &stripped[close_start + 2..close_end];
    if closing_tag != tag {
        return None;
    }
    let payload = &stripped[open_end + 1..close_start];
    let timestamp = ATTR_PATTERN
        .captures_iter(attr_string)
        .find(|c| &c[1] == "timestamp")
        .map(|c| c[2].to_string())
        .unwrap_or_default();
    Some(LogEntry {
        tag: tag.to_string(),
        timestamp,
        payload: decode_payload(payload),
    })
}

impl ConversationLog {
    /// Open (or lazily create) the log at `path`. Timestamps are rendered
    /// in `timezone`.
    pub fn new(path: PathBuf, timezone: Tz) -> Self {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, "conversation log directory creation failed");
            }
        }
        Self {
            path,
            timezone,
            lock: Mutex::new(()),
            append_hook: std::sync::Mutex::new(None),
        }
    }

    /// Install the post-append notification hook.
    pub fn set_append_hook(&self, hook: AppendHook) {
        *self.append_hook.lock().unwrap() = Some(hook);
    }

    fn now_timestamp(&self) -> String {
        chrono::Utc::now()
            .with_timezone(&self.timezone)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    async fn append(&self, tag: EntryTag, payload: &str) -> Result<String> {
        let timestamp = self.now_timestamp();
        let line = format_line(tag.as_str(), &timestamp, payload);
        {
            let _guard = self.lock.lock().await;
            let result = async {
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await?;
                file.write_all(line.as_bytes()).await?;
                Ok::<(), std::io::Error>(())
            }
            .await;
            if let Err(e) = result {
                error!(error = %e, tag = tag.as_str(), path = %self.path.display(), "conversation log append failed");
                return Err(e.into());
            }
        }
        self.notify_append();
        Ok(timestamp)
    }

    fn notify_append(&self) {
        let hook = self.append_hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook()));
            if outcome.is_err() {
                warn!("conversation log append hook panicked");
            }
        }
    }

    pub async fn record_user_message(&self, content: &str) -> Result<()> {
        self.append(EntryTag::UserMessage, content).await?;
        Ok(())
    }

    pub async fn record_agent_message(&self, content: &str) -> Result<()> {
        self.append(EntryTag::AgentMessage, content).await?;
        Ok(())
    }

    pub async fn record_reply(&self, content: &str) -> Result<()> {
        self.append(EntryTag::AlynReply, content).await?;
        Ok(())
    }

    /// Record a wait marker that must not reach the user-facing history.
    pub async fn record_wait(&self, reason: &str) -> Result<()> {
        self.append(EntryTag::Wait, reason).await?;
        Ok(())
    }

    /// All entries in file order. Malformed lines are skipped.
    pub async fn entries(&self) -> Result<Vec<LogEntry>> {
        let text = {
            let _guard = self.lock.lock().await;
            match tokio::fs::read_to_string(&self.path).await {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(e) => {
                    error!(error = %e, path = %self.path.display(), "conversation log read failed");
                    return Err(e.into());
                }
            }
        };
        Ok(text.lines().filter_map(parse_line).collect())
    }

    /// Full transcript as an XML-like string for prompt embedding. Wait
    /// markers are included; payloads keep their real newlines.
    pub async fn load_transcript(&self) -> Result<String> {
        let entries = self.entries().await?;
        let parts: Vec<String> = entries
            .iter()
            .map(|entry| {
                let payload = escape_text(&entry.payload);
                if entry.timestamp.is_empty() {
                    format!("<{tag}>{payload}</{tag}>", tag = entry.tag)
                } else {
                    format!(
                        "<{tag} timestamp=\"{ts}\">{payload}</{tag}>",
                        tag = entry.tag,
                        ts = entry.timestamp
                    )
                }
            })
            .collect();
        Ok(parts.join("\n"))
    }

    /// User-visible chat projection: `user_message` → user, `alyn_reply` →
    /// assistant. Wait markers and raw agent messages are omitted.
    pub async fn to_chat_messages(&self) -> Result<Vec<ChatMessage>> {
        let entries = self.entries().await?;
        let mut messages = Vec::new();
        for entry in entries {
            let role = match entry.tag.as_str() {
                "user_message" => Role::User,
                "alyn_reply" => Role::Assistant,
                _ => continue,
            };
            messages.push(ChatMessage {
                role,
                content: entry.payload,
                timestamp: (!entry.timestamp.is_empty()).then_some(entry.timestamp),
            });
        }
        Ok(messages)
    }

    /// Truncate the log. The file is removed in one step under the lock so
    /// a concurrent reader sees either the old content or nothing.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "conversation log clear failed");
                Err(e.into())
            }
        }
    }
}
