use serde::{Deserialize, Serialize};

/// A selector over users, as written in the operator console and stored
/// verbatim on a deferred command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    All,
    User(String),
    Group(String),
}

impl Target {
    pub fn parse(s: &str) -> Self {
        if s == "all" {
            Target::All
        } else if let Some(name) = s.strip_prefix("group:") {
            Target::Group(name.to_string())
        } else {
            Target::User(s.to_string())
        }
    }

    pub fn to_wire_string(&self) -> String {
        match self {
            Target::All => "all".to_string(),
            Target::User(id) => id.clone(),
            Target::Group(name) => format!("group:{name}"),
        }
    }
}

/// Replaces the literal placeholder `{user}` with the id of the user a
/// payload is being dispatched to. Substitution happens at dispatch time,
/// never when the deferred record is stored.
pub fn substitute_user_placeholder(text: &str, user_id: &str) -> String {
    text.replace("{user}", user_id)
}
