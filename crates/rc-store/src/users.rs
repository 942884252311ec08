use crate::atomic::{read_json_or_default, write_json};
use anyhow::Result;
use chrono::Utc;
use rc_types::models::{SessionEntry, SessionHistory, UserDirectoryFile, UserRecord, UserStatus};
use rc_types::translit::transliterate;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;

/// The user directory (C3): maps a stable agent id to its derived alias,
/// online status, and session history. Backed by one JSON file for the
/// directory plus one JSON file per alias for session history, each
/// rewritten atomically on every mutation.
pub struct UserDirectory {
    state: Mutex<UserDirectoryFile>,
    users_path: PathBuf,
    history_dir: PathBuf,
}

impl UserDirectory {
    pub fn open(users_path: PathBuf, history_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&history_dir)?;
        let state: UserDirectoryFile = read_json_or_default(&users_path);
        Ok(Self {
            state: Mutex::new(state),
            users_path,
            history_dir,
        })
    }

    /// Acquire the directory for a read-only query.
    pub fn with_state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&UserDirectoryFile) -> T,
    {
        let guard = self.state.lock().expect("user directory lock poisoned");
        f(&guard)
    }

    /// Acquire the directory for a mutation, persisting afterward.
    fn with_state_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut UserDirectoryFile) -> T,
    {
        let mut guard = self.state.lock().expect("user directory lock poisoned");
        let result = f(&mut guard);
        write_json(&self.users_path, &*guard)?;
        Ok(result)
    }

    /// Registers `id` if unseen, or marks an existing user `ON` again.
    /// Idempotent across repeated connects from the same id. Returns the
    /// user's alias.
    pub fn register(&self, id: &str) -> Result<String> {
        let now = Utc::now();
        let alias = self.with_state_mut(|state| {
            let record = state
                .users
                .entry(id.to_string())
                .or_insert_with(|| {
                    let alias = transliterate(id);
                    info!(user = id, alias = %alias, "new user registered");
                    UserRecord {
                        alias,
                        status: UserStatus::On,
                        last_login: None,
                        last_logout: None,
                    }
                });
            record.status = UserStatus::On;
            record.last_login = Some(now);
            record.alias.clone()
        })?;
        self.log_session(id, &alias, now, true)?;
        Ok(alias)
    }

    /// Marks `id` offline and closes its most recent open session.
    pub fn logout(&self, id: &str) -> Result<()> {
        let now = Utc::now();
        let alias = self.with_state_mut(|state| {
            state.users.get_mut(id).map(|record| {
                record.status = UserStatus::Off;
                record.last_logout = Some(now);
                record.alias.clone()
            })
        })?;
        if let Some(alias) = alias {
            self.log_session(id, &alias, now, false)?;
        }
        Ok(())
    }

    /// Case-insensitive alias lookup.
    pub fn by_alias(&self, alias: &str) -> Option<String> {
        self.with_state(|state| {
            state
                .users
                .iter()
                .find(|(_, record)| record.alias.eq_ignore_ascii_case(alias))
                .map(|(id, _)| id.clone())
        })
    }

    pub fn all_ids(&self) -> Vec<String> {
        self.with_state(|state| state.users.keys().cloned().collect())
    }

    fn history_path(&self, alias: &str) -> PathBuf {
        self.history_dir.join(format!("{alias}.json"))
    }

    fn log_session(&self, username: &str, alias: &str, now: chrono::DateTime<Utc>, login: bool) -> Result<()> {
        let path = self.history_path(alias);
        let mut history: SessionHistory = if path.exists() {
            read_json_or_default(&path)
        } else {
            SessionHistory {
                username: username.to_string(),
                alias: alias.to_string(),
                sessions: Vec::new(),
            }
        };

        if login {
            history.sessions.push(SessionEntry {
                login: now,
                logout: None,
            });
        } else if let Some(open) = history.sessions.iter_mut().rev().find(|s| s.logout.is_none()) {
            open.logout = Some(now);
        }

        write_json(&path, &history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn register_is_idempotent_and_case_insensitive_lookup_works() {
        let dir = tempdir().unwrap();
        let directory =
            UserDirectory::open(dir.path().join("users.json"), dir.path().join("history")).unwrap();

        let alias1 = directory.register("alice").unwrap();
        let alias2 = directory.register("alice").unwrap();
        assert_eq!(alias1, alias2);

        assert_eq!(directory.by_alias(&alias1.to_uppercase()), Some("alice".to_string()));
    }

    #[test]
    fn logout_closes_the_open_session() {
        let dir = tempdir().unwrap();
        let directory =
            UserDirectory::open(dir.path().join("users.json"), dir.path().join("history")).unwrap();
        let alias = directory.register("bob").unwrap();
        directory.logout("bob").unwrap();

        let history: SessionHistory =
            read_json_or_default(&dir.path().join("history").join(format!("{alias}.json")));
        assert_eq!(history.sessions.len(), 1);
        assert!(history.sessions[0].logout.is_some());
    }
}
