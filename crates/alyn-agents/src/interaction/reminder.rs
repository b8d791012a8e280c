//! Reminder-message classification for the agent-message path.
//!
//! Reminder traffic is formulaic enough that an LLM round-trip adds
//! nothing: a fired reminder, a creation confirmation, or general
//! reminder chatter each get a short canned reply. French and English
//! keywords are both recognised.

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderMessageType {
    /// A fired reminder being delivered.
    Notification,
    /// Confirmation that a reminder was created.
    Creation,
    /// Other reminder-related chatter.
    General,
    /// Not a reminder message.
    None,
}

#[derive(Debug, Clone)]
pub struct ReminderMessage {
    pub message_type: ReminderMessageType,
    pub original_text: String,
    pub reminder_content: Option<String>,
    pub trigger_time: Option<String>,
    pub reminder_title: Option<String>,
    pub is_error: bool,
}

static NOTIFICATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\[SUCCESS\]\s*Rappels\s+personnels\s*:\s*(.+)").expect("notification pattern")
});

static TITLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:titre|title|message|content)\s*:\s*["']?([^"'\n]+)["']?"#)
        .expect("title pattern")
});

static TIME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:heure|time).*?(?:déclenchement|trigger)\s*:\s*([^\n]+)")
        .expect("time pattern")
});

static ERROR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:problème|problem|erreur|error|échec|failed?)\b").expect("error pattern")
});

const STATUS_KEYWORDS: &[&str] = &[
    "créé", "created", "programmé", "programmed", "actif", "active", "scheduled",
];
const ENTITY_KEYWORDS: &[&str] = &["rappel", "reminder", "mémo", "memo"];
const IDENTIFIER_KEYWORDS: &[&str] = &["#", "id:", "id "];
const GENERAL_KEYWORDS: &[&str] = &[
    "rappel",
    "reminder",
    "remind",
    "rappeler",
    "mémo",
    "memo",
    "alarme",
    "alarm",
    "notification",
    "notifier",
];

#[derive(Default)]
pub struct ReminderMessageParser;

impl ReminderMessageParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, message: &str) -> ReminderMessage {
        if let Some(parsed) = self.check_notification(message) {
            return parsed;
        }
        if let Some(parsed) = self.check_creation(message) {
            return parsed;
        }
        if self.is_general_reminder(message) {
            return ReminderMessage {
                message_type: ReminderMessageType::General,
                original_text: message.to_string(),
                reminder_content: None,
                trigger_time: None,
                reminder_title: None,
                is_error: ERROR_PATTERN.is_match(message),
            };
        }
        ReminderMessage {
            message_type: ReminderMessageType::None,
            original_text: message.to_string(),
            reminder_content: None,
            trigger_time: None,
            reminder_title: None,
            is_error: false,
        }
    }

    fn check_notification(&self, message: &str) -> Option<ReminderMessage> {
        let captures = NOTIFICATION_PATTERN.captures(message)?;
        let content = captures.get(1)?.as_str().trim();
        let content = content.trim_start_matches(':').trim_start();
        Some(ReminderMessage {
            message_type: ReminderMessageType::Notification,
            original_text: message.to_string(),
            reminder_content: Some(content.to_string()),
            trigger_time: None,
            reminder_title: None,
            is_error: false,
        })
    }

    fn check_creation(&self, message: &str) -> Option<ReminderMessage> {
        let lower = message.to_lowercase();
        let has_entity = ENTITY_KEYWORDS.iter().any(|k| lower.contains(k));
        let has_status = STATUS_KEYWORDS.iter().any(|k| lower.contains(k));
        let has_identifier = IDENTIFIER_KEYWORDS.iter().any(|k| lower.contains(k));
        if !(has_entity && has_status && has_identifier) {
            return None;
        }

        let title = TITLE_PATTERN
            .captures(message)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|t| t.len() > 3);
        let trigger_time = TIME_PATTERN
            .captures(message)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().trim().split_whitespace().next())
            .map(str::to_string);

        Some(ReminderMessage {
            message_type: ReminderMessageType::Creation,
            original_text: message.to_string(),
            reminder_content: None,
            trigger_time,
            reminder_title: title,
            is_error: false,
        })
    }

    fn is_general_reminder(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        GENERAL_KEYWORDS.iter().any(|k| lower.contains(k))
    }

    /// Text shown to the user for a fired reminder.
    pub fn format_notification(&self, parsed: &ReminderMessage) -> String {
        parsed
            .reminder_content
            .clone()
            .unwrap_or_else(|| parsed.original_text.clone())
    }

    /// Short confirmation for a created reminder.
    pub fn format_creation(&self, parsed: &ReminderMessage) -> String {
        match (&parsed.reminder_title, &parsed.trigger_time) {
            (Some(title), Some(time)) => format!("✅ Rappel créé : \"{title}\" pour {time}"),
            (Some(title), None) => format!("✅ Rappel créé : \"{title}\""),
            _ => "✅ Rappel créé avec succès".to_string(),
        }
    }

    /// Canned reply for general reminder chatter.
    pub fn format_general(&self, parsed: &ReminderMessage) -> String {
        if parsed.is_error {
            "Le système de rappels rencontre des difficultés. Utilise une alarme téléphone comme alternative."
                .to_string()
        } else {
            "Rappel noté.".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_extracts_the_reminder_content() {
        let parser = ReminderMessageParser::new();
        let parsed = parser.parse("[SUCCESS] Rappels personnels : Réunion équipe à 14h");
        assert_eq!(parsed.message_type, ReminderMessageType::Notification);
        assert_eq!(
            parser.format_notification(&parsed),
            "Réunion équipe à 14h"
        );
    }

    #[test]
    fn creation_requires_entity_status_and_identifier() {
        let parser = ReminderMessageParser::new();
        let parsed = parser.parse(
            "Rappel créé #12\nTitre: Appeler le dentiste\nHeure de déclenchement: 15:30 demain",
        );
        assert_eq!(parsed.message_type, ReminderMessageType::Creation);
        assert_eq!(parsed.reminder_title.as_deref(), Some("Appeler le dentiste"));
        assert_eq!(parsed.trigger_time.as_deref(), Some("15:30"));
        assert_eq!(
            parser.format_creation(&parsed),
            "✅ Rappel créé : \"Appeler le dentiste\" pour 15:30"
        );

        // Entity + status without identifier is not a creation.
        let partial = parser.parse("Reminder created successfully");
        assert_ne!(partial.message_type, ReminderMessageType::Creation);
    }

    #[test]
    fn general_keyword_matches_broadly() {
        let parser = ReminderMessageParser::new();
        let parsed = parser.parse("Le reminder est en place");
        assert_eq!(parsed.message_type, ReminderMessageType::General);
        assert_eq!(parser.format_general(&parsed), "Rappel noté.");

        // The broad keyword match also catches unrelated messages that
        // merely mention reminders; pinned here as the known trade-off.
        let unrelated = parser.parse("John asked about the reminder feature roadmap");
        assert_eq!(unrelated.message_type, ReminderMessageType::General);
    }

    #[test]
    fn general_error_gets_the_fallback_reply() {
        let parser = ReminderMessageParser::new();
        let parsed = parser.parse("Erreur: le rappel n'a pas pu être créé");
        assert_eq!(parsed.message_type, ReminderMessageType::General);
        assert!(parsed.is_error);
        assert!(parser.format_general(&parsed).contains("alarme téléphone"));
    }

    #[test]
    fn ordinary_messages_pass_through() {
        let parser = ReminderMessageParser::new();
        let parsed = parser.parse("[SUCCESS] Email to John: message sent");
        assert_eq!(parsed.message_type, ReminderMessageType::None);
    }
}
