use crate::atomic::{read_json_or_default, write_json};
use anyhow::Result;
use rc_types::models::GroupMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// The group registry (C4): named, ordered sets of user ids. Membership may
/// include ids that are not (yet) registered users.
pub struct GroupRegistry {
    state: Mutex<GroupMap>,
    path: PathBuf,
}

impl GroupRegistry {
    pub fn open(path: PathBuf) -> Result<Self> {
        let state: GroupMap = read_json_or_default(&path);
        Ok(Self {
            state: Mutex::new(state),
            path,
        })
    }

    pub fn members(&self, name: &str) -> Option<Vec<String>> {
        let guard = self.state.lock().expect("group registry lock poisoned");
        guard.get(name).cloned()
    }

    pub fn all(&self) -> GroupMap {
        self.state.lock().expect("group registry lock poisoned").clone()
    }

    pub fn create(&self, name: &str, members: Vec<String>) -> Result<bool> {
        let mut guard = self.state.lock().expect("group registry lock poisoned");
        if guard.contains_key(name) {
            return Ok(false);
        }
        guard.insert(name.to_string(), members);
        write_json(&self.path, &*guard)?;
        Ok(true)
    }

    pub fn delete(&self, name: &str) -> Result<bool> {
        let mut guard = self.state.lock().expect("group registry lock poisoned");
        let removed = guard.remove(name).is_some();
        if removed {
            write_json(&self.path, &*guard)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_lookup_members() {
        let dir = tempdir().unwrap();
        let registry = GroupRegistry::open(dir.path().join("groups.json")).unwrap();
        assert!(registry
            .create("ops", vec!["alice".into(), "bob".into()])
            .unwrap());
        assert_eq!(
            registry.members("ops"),
            Some(vec!["alice".to_string(), "bob".to_string()])
        );
        assert!(!registry.create("ops", vec![]).unwrap());
    }

    #[test]
    fn missing_group_expands_empty() {
        let dir = tempdir().unwrap();
        let registry = GroupRegistry::open(dir.path().join("groups.json")).unwrap();
        assert_eq!(registry.members("nope"), None);
    }
}
