//! Flat user-profile store backing the personalization section of the
//! interaction prompt.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Stored as `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl UserProfile {
    pub fn is_empty(&self) -> bool {
        self.user_name.is_none() && self.birth_date.is_none() && self.location.is_none()
    }
}

pub struct ProfileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ProfileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn load(&self) -> UserProfile {
        let _guard = self.lock.lock().unwrap();
        match std::fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(error = %e, "failed to parse profile file");
                UserProfile::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => UserProfile::default(),
            Err(e) => {
                warn!(error = %e, "failed to read profile file");
                UserProfile::default()
            }
        }
    }

    pub fn save(&self, profile: &UserProfile) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(profile)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&self.path, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_empty_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profile.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn profile_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profile.json"));
        store
            .save(&UserProfile {
                user_name: Some("Camille".to_string()),
                birth_date: Some("1994-02-11".to_string()),
                location: None,
            })
            .unwrap();
        let loaded = store.load();
        assert_eq!(loaded.user_name.as_deref(), Some("Camille"));
        assert!(loaded.location.is_none());
    }
}
