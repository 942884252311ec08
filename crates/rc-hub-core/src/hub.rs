use crate::last_output::LastOutputCache;
use crate::live_clients::LiveClients;
use crate::monitor::CommandMonitor;
use anyhow::Result;
use rc_store::{DeferredStore, GroupRegistry, UserDirectory};
use std::path::PathBuf;
use tracing::warn;

/// Hub-wide configuration: where state lives on disk and how the listener
/// and periodic tasks are tuned. Constructed by the `hub` binary from
/// `HUB_*` environment variables (see `hub::config` there); kept as a plain
/// struct here so library code never touches the environment directly.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub bind_host: String,
    pub bind_port: u16,
    pub data_dir: PathBuf,
    pub operator_console_enabled: bool,
    pub snapshot_interval_secs: u64,
}

impl HubConfig {
    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }
    pub fn history_dir(&self) -> PathBuf {
        self.data_dir.join("history")
    }
    pub fn groups_path(&self) -> PathBuf {
        self.data_dir.join("groups.json")
    }
    pub fn scheduled_path(&self) -> PathBuf {
        self.data_dir.join("scheduled_commands.json")
    }
    pub fn scheduled_results_dir(&self) -> PathBuf {
        self.data_dir.join("scheduled_results")
    }
    pub fn files_dir(&self) -> PathBuf {
        self.data_dir.join("files")
    }
    pub fn command_output_dir(&self) -> PathBuf {
        self.data_dir.join("command_output")
    }
    pub fn save_dir(&self) -> PathBuf {
        self.data_dir.join("saved")
    }
    pub fn simpl_script_path(&self) -> PathBuf {
        self.data_dir.join("code.txt")
    }
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("server_state.json")
    }
    pub fn crash_log_path(&self) -> PathBuf {
        self.data_dir.join("crash.log")
    }
}

/// All hub-global shared state (§5): one lock per resource, each crate
/// already providing its own interior synchronization.
pub struct Hub {
    pub config: HubConfig,
    pub users: UserDirectory,
    pub groups: GroupRegistry,
    pub deferred: DeferredStore,
    pub monitor: CommandMonitor,
    pub live: LiveClients,
    pub last_output: LastOutputCache,
}

impl Hub {
    pub fn open(config: HubConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let users = UserDirectory::open(config.users_path(), config.history_dir())?;
        let groups = GroupRegistry::open(config.groups_path())?;
        let deferred = DeferredStore::open(config.scheduled_path(), config.scheduled_results_dir())?;
        std::fs::create_dir_all(config.files_dir())?;
        std::fs::create_dir_all(config.command_output_dir())?;
        std::fs::create_dir_all(config.save_dir())?;

        Ok(Self {
            config,
            users,
            groups,
            deferred,
            monitor: CommandMonitor::new(),
            live: LiveClients::new(),
            last_output: LastOutputCache::new(),
        })
    }
}

/// Notifies every connected agent that the hub is going down, logs each one
/// out, and writes a final snapshot. Called once by `main` after its
/// `tokio::select!` over the signal, console-exit, and accept futures
/// resolves — never mid-session.
pub async fn graceful_shutdown(hub: &Hub) {
    let ids = hub.live.ids().await;
    for id in &ids {
        if let Some(writer) = hub.live.get(id).await {
            let _ = writer.write_line("KICK:The hub is shutting down").await;
        }
        if let Err(e) = hub.users.logout(id) {
            warn!(agent = %id, error = %e, "failed to record logout during shutdown");
        }
    }
    crate::snapshot::write_snapshot(hub).await;
}
