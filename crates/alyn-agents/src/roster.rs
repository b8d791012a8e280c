//! The execution-agent roster: an ordered, deduplicated list of display
//! names persisted as a JSON array.
//!
//! Identity is the whitespace-collapsed, lowercased form of a name;
//! original casing of the first occurrence is preserved. Saves take an
//! advisory file lock with exponential backoff so concurrent processes
//! cooperate on the same file.

use std::collections::HashSet;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use fs2::FileExt;
use tracing::{info, warn};

const MAX_LOCK_RETRIES: u32 = 5;
const LOCK_RETRY_BASE: Duration = Duration::from_millis(100);

pub struct AgentRoster {
    path: PathBuf,
    agents: Mutex<Vec<String>>,
}

/// Collapse whitespace runs and strip surrounding spaces.
fn clean_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deduplication key for an agent name.
fn normalized_key(name: &str) -> String {
    clean_name(name).to_lowercase()
}

/// Normalise names and drop duplicates/empties, preserving order.
/// Returns `(unique, removed)`.
fn sanitize(names: &[String]) -> (Vec<String>, Vec<String>) {
    let mut unique = Vec::new();
    let mut removed = Vec::new();
    let mut seen = HashSet::new();

    for raw in names {
        let cleaned = clean_name(raw);
        if cleaned.is_empty() {
            removed.push(raw.clone());
            continue;
        }
        let key = normalized_key(&cleaned);
        if seen.contains(&key) {
            removed.push(cleaned);
            continue;
        }
        seen.insert(key);
        unique.push(cleaned);
    }

    (unique, removed)
}

impl AgentRoster {
    /// Open the roster at `path`, loading and sanitising any existing
    /// content immediately.
    pub fn new(path: PathBuf) -> Self {
        let roster = Self {
            path,
            agents: Mutex::new(Vec::new()),
        };
        roster.load();
        roster
    }

    /// Reload from disk, pruning duplicate or invalid entries. A roster
    /// that needed pruning (or does not exist yet) is written back.
    pub fn load(&self) {
        let original: Vec<String> = match std::fs::read_to_string(&self.path) {
            Ok(text) => match serde_json::from_str::<Vec<String>>(&text) {
                Ok(names) => names,
                Err(e) => {
                    warn!(error = %e, "failed to parse roster file");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(error = %e, "failed to read roster file");
                Vec::new()
            }
        };

        let (sanitized, removed) = sanitize(&original);
        let changed = sanitized != original;
        *self.agents.lock().unwrap() = sanitized;

        if !self.path.exists() || changed {
            self.save();
        }
        if !removed.is_empty() {
            info!(removed = ?removed, "pruned duplicate or invalid roster entries");
        }
    }

    /// Persist the roster under an advisory exclusive lock, retrying with
    /// exponential backoff when another process holds it.
    pub fn save(&self) {
        let agents = {
            let mut agents = self.agents.lock().unwrap();
            let (sanitized, _) = sanitize(&agents);
            *agents = sanitized.clone();
            sanitized
        };

        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, "failed to create roster directory");
                return;
            }
        }

        let mut delay = LOCK_RETRY_BASE;
        for attempt in 0..MAX_LOCK_RETRIES {
            let file = match File::create(&self.path) {
                Ok(file) => file,
                Err(e) => {
                    warn!(error = %e, "failed to open roster file for writing");
                    return;
                }
            };
            match file.try_lock_exclusive() {
                Ok(()) => {
                    let outcome = serde_json::to_writer_pretty(&file, &agents);
                    let _ = fs2::FileExt::unlock(&file);
                    if let Err(e) = outcome {
                        warn!(error = %e, "failed to write roster file");
                    }
                    return;
                }
                Err(_) if attempt + 1 < MAX_LOCK_RETRIES => {
                    std::thread::sleep(delay);
                    delay *= 2;
                }
                Err(_) => {
                    warn!("failed to acquire roster lock after retries");
                    return;
                }
            }
        }
    }

    /// Drop duplicates accumulated in memory, persisting when anything
    /// changed. Returns the discarded entries.
    pub fn prune_duplicates(&self) -> Vec<String> {
        let removed = {
            let mut agents = self.agents.lock().unwrap();
            let (sanitized, removed) = sanitize(&agents);
            if sanitized != *agents {
                *agents = sanitized;
            }
            removed
        };
        if !removed.is_empty() {
            self.save();
            info!(removed = ?removed, "removed duplicate agents");
        }
        removed
    }

    /// Add `agent_name` unless an equivalent entry already exists.
    pub fn add_agent(&self, agent_name: &str) {
        let cleaned = clean_name(agent_name);
        if cleaned.is_empty() {
            return;
        }
        let key = normalized_key(&cleaned);
        {
            let mut agents = self.agents.lock().unwrap();
            if agents.iter().any(|existing| normalized_key(existing) == key) {
                return;
            }
            agents.push(cleaned);
        }
        self.save();
    }

    /// Case-insensitive membership test.
    pub fn has_agent(&self, agent_name: &str) -> bool {
        let key = normalized_key(agent_name);
        self.agents
            .lock()
            .unwrap()
            .iter()
            .any(|existing| normalized_key(existing) == key)
    }

    /// Remove an agent; returns whether an entry was dropped.
    pub fn remove_agent(&self, agent_name: &str) -> bool {
        let key = normalized_key(agent_name);
        let removed = {
            let mut agents = self.agents.lock().unwrap();
            let before = agents.len();
            agents.retain(|existing| normalized_key(existing) != key);
            agents.len() != before
        };
        if removed {
            self.save();
        }
        removed
    }

    pub fn agents(&self) -> Vec<String> {
        self.agents.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.agents.lock().unwrap().clear();
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to clear roster file");
            }
        }
        info!("cleared agent roster");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> (tempfile::TempDir, AgentRoster) {
        let dir = tempfile::tempdir().unwrap();
        let roster = AgentRoster::new(dir.path().join("roster.json"));
        (dir, roster)
    }

    #[test]
    fn add_is_case_and_whitespace_insensitive() {
        let (_dir, roster) = roster();
        roster.add_agent("Email to John");
        roster.add_agent("  email   TO john ");
        assert_eq!(roster.agents(), vec!["Email to John"]);
        assert!(roster.has_agent("EMAIL TO JOHN"));
    }

    #[test]
    fn roster_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        {
            let roster = AgentRoster::new(path.clone());
            roster.add_agent("Vercel Job Offer");
            roster.add_agent("Email to Sharanjeet");
        }
        let reloaded = AgentRoster::new(path);
        assert_eq!(
            reloaded.agents(),
            vec!["Vercel Job Offer", "Email to Sharanjeet"]
        );
    }

    #[test]
    fn duplicates_in_file_are_pruned_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        std::fs::write(&path, r#"["Mailer", "mailer", "", "  MAILER  ", "Other"]"#).unwrap();
        let roster = AgentRoster::new(path);
        assert_eq!(roster.agents(), vec!["Mailer", "Other"]);
    }

    #[test]
    fn remove_agent_reports_outcome() {
        let (_dir, roster) = roster();
        roster.add_agent("Mailer");
        assert!(roster.remove_agent("mailer"));
        assert!(!roster.remove_agent("mailer"));
        assert!(roster.agents().is_empty());
    }
}
