//! Conversation state for the orchestrator: the append-only conversation
//! log and the duplicate detector that collapses echoed messages.

pub mod dedup;
pub mod error;
pub mod log;

pub use dedup::{DetectorStats, DuplicateDetector};
pub use error::{ConversationError, Result};
pub use log::{
    decode_payload, encode_payload, escape_text, format_line, parse_line, ConversationLog,
    EntryTag, LogEntry,
};
