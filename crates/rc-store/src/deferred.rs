use crate::atomic::{read_json_or_default, write_json};
use anyhow::{Context, Result};
use chrono::Utc;
use rc_types::models::{CommandKind, DeferredCommand, DeferredStoreFile};
use rc_types::Target;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// The deferred-command store (C5): a persistent queue of commands pending
/// per user id. A record's `expected_users` set is frozen to the target's
/// expansion at creation time — members added to a group afterward do not
/// inherit pending work.
pub struct DeferredStore {
    state: Mutex<DeferredStoreFile>,
    path: PathBuf,
    results_dir: PathBuf,
}

impl DeferredStore {
    pub fn open(path: PathBuf, results_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&results_dir)?;
        let state: DeferredStoreFile = read_json_or_default(&path);
        Ok(Self {
            state: Mutex::new(state),
            path,
            results_dir,
        })
    }

    fn persist(&self, guard: &DeferredStoreFile) -> Result<()> {
        write_json(&self.path, guard)
    }

    /// Adds a new record, its `expected_users` fixed to `expanded_target`
    /// (the caller computes this by expanding the target against the
    /// current user directory / group registry — the store itself has no
    /// view of those).
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        target: Target,
        kind: CommandKind,
        command: Option<String>,
        source_path: Option<String>,
        dest_path: Option<String>,
        expanded_target: Vec<String>,
    ) -> Result<u64> {
        let mut guard = self.state.lock().expect("deferred store lock poisoned");
        let id = guard.next_id;
        guard.next_id += 1;
        let record = DeferredCommand {
            id,
            target: target.to_wire_string(),
            kind,
            created_at: Utc::now(),
            completed_at: None,
            expected_users: expanded_target,
            completed_users: Vec::new(),
            command,
            source_path,
            dest_path,
        };
        guard.commands.push(record);
        self.persist(&guard)?;
        Ok(id)
    }

    /// All active records expecting `user`, paired with their stable id —
    /// never a `Vec` position, which can shift under a concurrent completion
    /// of a sibling record.
    pub fn for_user(&self, user: &str) -> Vec<(u64, DeferredCommand)> {
        let guard = self.state.lock().expect("deferred store lock poisoned");
        guard
            .commands
            .iter()
            .filter(|cmd| cmd.expected_users.iter().any(|u| u == user))
            .map(|cmd| (cmd.id, cmd.clone()))
            .collect()
    }

    /// Moves `user` from `expected` to `completed` on the record identified
    /// by `id`, appends `output` to the target's result file, and migrates
    /// the record to `completed` once no users remain expected.
    ///
    /// `IMPORT` records are credited here at dispatch time rather than on
    /// the agent's `IMPORT:COMPLETE` acknowledgment (see the open-question
    /// decision in the design notes) — a push the agent fails to store is
    /// still marked done.
    pub fn mark_completed(&self, id: u64, user: &str, output: &str) -> Result<()> {
        let mut guard = self.state.lock().expect("deferred store lock poisoned");
        let position = guard
            .commands
            .iter()
            .position(|cmd| cmd.id == id)
            .context("deferred command id not found among active records")?;

        let target = {
            let cmd = &mut guard.commands[position];
            if let Some(pos) = cmd.expected_users.iter().position(|u| u == user) {
                cmd.expected_users.remove(pos);
                cmd.completed_users.push(user.to_string());
            }
            cmd.target.clone()
        };

        self.write_output(&target, user, output)?;

        if guard.commands[position].is_complete() {
            let mut cmd = guard.commands.remove(position);
            cmd.completed_at = Some(Utc::now());
            guard.completed.push(cmd);
        }

        self.persist(&guard)
    }

    /// Removes `id` from every active record's `expected_users` (used when
    /// a user drops out of all groups that target them); completes any
    /// record this empties.
    pub fn remove_user_from_expected(&self, id: &str) -> Result<()> {
        let mut guard = self.state.lock().expect("deferred store lock poisoned");
        let mut i = 0;
        while i < guard.commands.len() {
            let emptied = {
                let cmd = &mut guard.commands[i];
                if let Some(pos) = cmd.expected_users.iter().position(|u| u == id) {
                    cmd.expected_users.remove(pos);
                }
                cmd.is_complete()
            };
            if emptied {
                let mut cmd = guard.commands.remove(i);
                cmd.completed_at = Some(Utc::now());
                guard.completed.push(cmd);
            } else {
                i += 1;
            }
        }
        self.persist(&guard)
    }

    /// All still-active records, in creation order, for the console's
    /// `chart_list`.
    pub fn all_active(&self) -> Vec<DeferredCommand> {
        self.state.lock().expect("deferred store lock poisoned").commands.clone()
    }

    /// All finished records, for the console's `chart_comd`.
    pub fn all_completed(&self) -> Vec<DeferredCommand> {
        self.state.lock().expect("deferred store lock poisoned").completed.clone()
    }

    /// Removes the active record at `index` outright (the console's
    /// `chart_del`), independent of its completion state.
    pub fn remove_active(&self, index: usize) -> Result<Option<DeferredCommand>> {
        let mut guard = self.state.lock().expect("deferred store lock poisoned");
        if index >= guard.commands.len() {
            return Ok(None);
        }
        let removed = guard.commands.remove(index);
        self.persist(&guard)?;
        Ok(Some(removed))
    }

    fn result_filename(target: &str) -> String {
        if target == "all" {
            "ALL.txt".to_string()
        } else if let Some(group) = target.strip_prefix("group:") {
            format!("group_{group}.txt")
        } else {
            format!("{target}.txt")
        }
    }

    fn write_output(&self, target: &str, id: &str, output: &str) -> Result<()> {
        let path = self.results_dir.join(Self::result_filename(target));
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        write!(file, "{id}\n{output}\n\n\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, DeferredStore) {
        let dir = tempdir().unwrap();
        let store = DeferredStore::open(
            dir.path().join("scheduled_commands.json"),
            dir.path().join("results"),
        )
        .unwrap();
        (dir, store)
    }

    #[test]
    fn completion_tracking_matches_testable_property_four() {
        let (_dir, store) = store();
        let idx = store
            .add(
                Target::All,
                CommandKind::Cmd,
                Some("whoami".into()),
                None,
                None,
                vec!["u1".into(), "u2".into(), "u3".into()],
            )
            .unwrap();

        store.mark_completed(idx, "u1", "out1").unwrap();
        store.mark_completed(idx, "u3", "out3").unwrap();

        let active = store.for_user("u2");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].1.expected_users, vec!["u2".to_string()]);
        assert_eq!(
            active[0].1.completed_users,
            vec!["u1".to_string(), "u3".to_string()]
        );

        store.mark_completed(idx, "u2", "out2").unwrap();
        assert!(store.for_user("u2").is_empty());

        let guard = store.state.lock().unwrap();
        assert_eq!(guard.commands.len(), 0);
        assert_eq!(guard.completed.len(), 1);
        assert!(guard.completed[0].completed_at.is_some());
        drop(guard);

        let results = std::fs::read_to_string(store.results_dir.join("ALL.txt")).unwrap();
        let order: Vec<&str> = results.lines().filter(|l| l.starts_with('u')).collect();
        assert_eq!(order, vec!["u1", "u3", "u2"]);
    }

    #[test]
    fn remove_user_from_expected_completes_emptied_records() {
        let (_dir, store) = store();
        let idx = store
            .add(
                Target::Group("ops".into()),
                CommandKind::Cmd,
                Some("uptime".into()),
                None,
                None,
                vec!["only-user".into()],
            )
            .unwrap();
        store.remove_user_from_expected("only-user").unwrap();
        assert!(store.for_user("only-user").is_empty());
        let guard = store.state.lock().unwrap();
        assert_eq!(guard.commands.len(), 0);
        assert_eq!(guard.completed.len(), 1);
        let _ = idx;
    }

    /// Completing an earlier record shifts every later record's `Vec`
    /// position down by one; a crediting key taken before that shift must
    /// still land on the right record afterward.
    #[test]
    fn completion_of_an_earlier_record_does_not_corrupt_a_later_records_id() {
        let (_dir, store) = store();
        let first = store
            .add(Target::All, CommandKind::Cmd, Some("a".into()), None, None, vec!["solo".into()])
            .unwrap();
        let second = store
            .add(Target::All, CommandKind::Cmd, Some("b".into()), None, None, vec!["carl".into()])
            .unwrap();

        // Finishing `first` removes it from `commands`, shifting `second`
        // from position 1 down to position 0.
        store.mark_completed(first, "solo", "done").unwrap();
        assert_eq!(store.state.lock().unwrap().commands.len(), 1);

        // `second`'s id must still resolve to the right record, not to
        // whatever now occupies its old `Vec` position.
        store.mark_completed(second, "carl", "done-too").unwrap();
        let guard = store.state.lock().unwrap();
        assert_eq!(guard.commands.len(), 0);
        assert_eq!(guard.completed.len(), 2);
        assert!(guard.completed.iter().any(|c| c.id == second && c.command.as_deref() == Some("b")));
    }
}
