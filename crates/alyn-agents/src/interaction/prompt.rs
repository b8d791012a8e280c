//! Prompt assembly for the interaction agent.

use serde_json::Value;

use alyn_conversation::log::escape_text;

use crate::lessons::LessonStore;
use crate::profile::UserProfile;

/// Lessons folded into the prompt, most-repeated first.
const MAX_PROMPT_LESSONS: usize = 5;

const SYSTEM_PROMPT: &str = "\
You are Alyn, a proactive personal assistant. You coordinate a roster of execution agents that handle email, calendar, web search and scheduled reminders on the user's behalf.

Core behavior:
- Route real work to execution agents with send_message_to_agent; name agents after their purpose (e.g. 'Email to John') and reuse an existing agent when one fits.
- Use send_message_to_user for anything the user should see now. Keep replies short, warm and concrete; never expose tool mechanics or internal errors.
- Use send_draft when the user should review exact email text before anything is sent.
- Use wait when the conversation history shows the message is already handled; do not repeat yourself.
- Remove agents that are no longer needed with remove_agent.
- When the user asks you to remember a mistake or preference, store it with add_lesson.

You see the full conversation history, the roster of active agents, and the newest message each turn. Agent updates arrive asynchronously; relay them only when they matter to the user.";

/// System prompt: persona, the execution-tool catalog, lessons, profile.
pub fn build_system_prompt(
    execution_catalog: &[(String, String)],
    lessons: &LessonStore,
    profile: &UserProfile,
) -> String {
    let mut sections = vec![SYSTEM_PROMPT.to_string()];

    if !execution_catalog.is_empty() {
        let mut tools = String::from(
            "# AVAILABLE AGENT TOOLS\n\nYour execution agents can use the following tools. \
             Reference these capabilities when the user asks what you can do:\n",
        );
        for (name, description) in execution_catalog {
            tools.push_str(&format!("\n- **{name}**: {description}"));
        }
        sections.push(tools);
    }

    if let Ok(Some(lessons_section)) = lessons.format_for_prompt(MAX_PROMPT_LESSONS) {
        sections.push(lessons_section);
    }

    sections.push(profile_section(profile));
    sections.join("\n\n")
}

fn profile_section(profile: &UserProfile) -> String {
    if profile.is_empty() {
        return "# USER PROFILE\n\nNo profile data is available yet. If the user asks what you \
                know about them, say you have nothing on file and that adding their name, date \
                of birth and location lets you personalize replies."
            .to_string();
    }

    let mut lines = Vec::new();
    if let Some(name) = &profile.user_name {
        lines.push(format!("- User's name: {name}"));
    }
    if let Some(birth_date) = &profile.birth_date {
        lines.push(format!("- User's date of birth: {birth_date}"));
    }
    if let Some(location) = &profile.location {
        lines.push(format!("- User's location: {location}"));
    }
    format!(
        "# USER PROFILE\n\nYou know the following about the user:\n\n{}\n\nUse this to \
         personalize responses naturally; do not recite it unprompted.",
        lines.join("\n")
    )
}

/// The kind of turn entering the interaction loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    User,
    Agent,
}

/// Compose the single user-role message bundling history, roster, and the
/// latest turn.
pub fn prepare_message_with_history(
    latest_text: &str,
    transcript: &str,
    roster_names: &[String],
    kind: TurnKind,
) -> Vec<Value> {
    let history = if transcript.trim().is_empty() {
        "None"
    } else {
        transcript.trim()
    };

    let agents = if roster_names.is_empty() {
        "None".to_string()
    } else {
        roster_names
            .iter()
            .map(|name| format!("<agent name=\"{}\" />", escape_attr(name)))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let tag = match kind {
        TurnKind::User => "new_user_message",
        TurnKind::Agent => "new_agent_message",
    };

    let content = format!(
        "<conversation_history>\n{history}\n</conversation_history>\n\n\
         <active_agents>\n{agents}\n</active_agents>\n\n\
         <{tag}>\n{}\n</{tag}>",
        latest_text.trim()
    );

    vec![serde_json::json!({"role": "user", "content": content})]
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}
