use rc_store::{GroupRegistry, UserDirectory};
use rc_types::Target;

/// Expands a target selector against the current user directory / group
/// registry. Callers that hand the result to a deferred record must do so
/// immediately — the expansion is frozen at that instant and never revisited
/// (members added to a group later do not inherit pending work).
///
/// `Target::User` and group members are resolved through `by_alias` first:
/// the console grammar lets an operator name a target by either its alias or
/// its raw id (`<alias-or-id>`), but `expected_users`/`completed_users` must
/// hold raw ids to line up with what a reconnecting agent's handshake line
/// actually contains.
pub fn expand(target: &Target, users: &UserDirectory, groups: &GroupRegistry) -> Vec<String> {
    let resolve = |raw: &str| users.by_alias(raw).unwrap_or_else(|| raw.to_string());
    match target {
        Target::All => users.all_ids(),
        Target::Group(name) => groups
            .members(name)
            .unwrap_or_default()
            .iter()
            .map(|member| resolve(member))
            .collect(),
        Target::User(id) => vec![resolve(id)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn group_expands_to_members_or_empty() {
        let dir = tempdir().unwrap();
        let groups = GroupRegistry::open(dir.path().join("groups.json")).unwrap();
        groups.create("ops", vec!["a".into(), "b".into()]).unwrap();

        assert_eq!(
            expand(
                &Target::Group("ops".into()),
                &UserDirectory::open(dir.path().join("u.json"), dir.path().join("h")).unwrap(),
                &groups
            ),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            expand(
                &Target::Group("missing".into()),
                &UserDirectory::open(dir.path().join("u2.json"), dir.path().join("h2")).unwrap(),
                &groups
            ),
            Vec::<String>::new()
        );
    }

    #[test]
    fn user_target_is_a_singleton() {
        let dir = tempdir().unwrap();
        let users = UserDirectory::open(dir.path().join("u.json"), dir.path().join("h")).unwrap();
        let groups = GroupRegistry::open(dir.path().join("g.json")).unwrap();
        assert_eq!(
            expand(&Target::User("carl".into()), &users, &groups),
            vec!["carl".to_string()]
        );
    }
}
