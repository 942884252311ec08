use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Online/offline flag kept alongside a user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    On,
    Off,
}

/// One login/logout pair in a user's session history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub login: DateTime<Utc>,
    pub logout: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub alias: String,
    pub status: UserStatus,
    pub last_login: Option<DateTime<Utc>>,
    pub last_logout: Option<DateTime<Utc>>,
}

/// Persisted shape of `users.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserDirectoryFile {
    #[serde(default)]
    pub users: HashMap<String, UserRecord>,
}

/// Persisted shape of `<history>/<alias>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHistory {
    pub username: String,
    pub alias: String,
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
}

/// Persisted shape of `groups.json`: group name to ordered member ids.
pub type GroupMap = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    Cmd,
    Simpl,
    Import,
    Export,
}

/// A deferred command, frozen against its target's expansion at creation
/// time. `expected_users` and `completed_users` are disjoint and their union
/// never changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredCommand {
    /// Stable identity assigned at creation, independent of this record's
    /// position in `DeferredStoreFile::commands` — positions shift as
    /// sibling records complete and are migrated out, but a FIFO of pending
    /// crediting work (see `CommandMonitor::deferred_pending`) may outlive
    /// several such shifts, so it keys on `id` rather than position.
    pub id: u64,
    pub target: String,
    pub kind: CommandKind,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expected_users: Vec<String>,
    #[serde(default)]
    pub completed_users: Vec<String>,
    /// Shell text for `Cmd`; absent for `Simpl` (reads the hub-local script
    /// file at replay time).
    #[serde(default)]
    pub command: Option<String>,
    /// Source/dest path pair for `Import`/`Export`.
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub dest_path: Option<String>,
}

impl DeferredCommand {
    pub fn is_complete(&self) -> bool {
        self.expected_users.is_empty()
    }
}

/// Persisted shape of `scheduled_commands.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeferredStoreFile {
    #[serde(default)]
    pub commands: Vec<DeferredCommand>,
    #[serde(default)]
    pub completed: Vec<DeferredCommand>,
    /// Next `DeferredCommand::id` to assign. Monotonic for the life of the
    /// store; never reused even as records complete and are removed.
    #[serde(default)]
    pub next_id: u64,
}

/// Per-agent in-flight command, at most one live at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InFlightCommand {
    pub kind: CommandKind,
    pub command_text: String,
    pub start_time: DateTime<Utc>,
    pub total_subcommands: u32,
    pub received_subcommands: u32,
    #[serde(default)]
    pub accumulated_output: Vec<String>,
}

impl InFlightCommand {
    pub fn new(kind: CommandKind, command_text: impl Into<String>, total_subcommands: u32) -> Self {
        Self {
            kind,
            command_text: command_text.into(),
            start_time: Utc::now(),
            total_subcommands: total_subcommands.max(1),
            received_subcommands: 0,
            accumulated_output: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.received_subcommands >= self.total_subcommands
    }

    pub fn combined_output(&self) -> String {
        self.accumulated_output.join("\n\n")
    }
}

/// Most recent finalized output for a user, shown by `save`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastOutput {
    pub content: String,
    pub kind: CommandKind,
    pub timestamp: DateTime<Utc>,
}

/// Advisory snapshot written every 30s; ignored by readers if stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStateSnapshot {
    pub timestamp: DateTime<Utc>,
    pub connected_clients: Vec<String>,
    pub active_commands: HashMap<String, ActiveCommandSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveCommandSummary {
    pub command: String,
    pub kind: CommandKind,
    pub elapsed_secs: f64,
}
