use crate::hub::Hub;
use rc_store::atomic::write_json;
use rc_types::models::{ActiveCommandSummary, ServerStateSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Builds the current advisory snapshot: every connected agent id plus a
/// summary of whatever command each one is running.
pub async fn build_snapshot(hub: &Hub) -> ServerStateSnapshot {
    let now = chrono::Utc::now();
    let active = hub.monitor.active_snapshot().await;
    let active_commands = active
        .into_iter()
        .map(|(id, cmd)| {
            let elapsed = now.signed_duration_since(cmd.start_time).num_milliseconds() as f64 / 1000.0;
            (
                id,
                ActiveCommandSummary {
                    command: cmd.command_text,
                    kind: cmd.kind,
                    elapsed_secs: elapsed,
                },
            )
        })
        .collect();

    ServerStateSnapshot {
        timestamp: now,
        connected_clients: hub.live.ids().await,
        active_commands,
    }
}

/// Writes the current snapshot to disk, replacing any previous one. A reader
/// that finds a stale `timestamp` knows the hub died without a clean
/// shutdown rather than trusting whatever state it last recorded.
pub async fn write_snapshot(hub: &Hub) {
    let snapshot = build_snapshot(hub).await;
    if let Err(e) = write_json(&hub.config.snapshot_path(), &snapshot) {
        warn!(error = %e, "failed to write the server-state snapshot");
    }
}

/// Runs forever, writing a fresh snapshot every `interval`. Spawned
/// alongside the accept loop and the operator console; only the process
/// exiting stops it.
pub async fn run_periodic_snapshot(hub: Arc<Hub>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        write_snapshot(&hub).await;
    }
}

/// Appends one line to the crash log. Used by `main`'s top-level error
/// handling, never by an ordinary `EXIT`-triggered shutdown.
pub fn append_crash_log(hub: &Hub, message: &str) {
    use std::io::Write;
    let path = hub.config.crash_log_path();
    let entry = format!("[{}] {message}\n", chrono::Utc::now().to_rfc3339());
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| file.write_all(entry.as_bytes()));
    if let Err(e) = result {
        warn!(error = %e, path = %path.display(), "failed to append to the crash log");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use rc_types::models::CommandKind;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> HubConfig {
        HubConfig {
            bind_host: "127.0.0.1".into(),
            bind_port: 0,
            data_dir: dir.to_path_buf(),
            operator_console_enabled: false,
            snapshot_interval_secs: 30,
        }
    }

    #[tokio::test]
    async fn snapshot_reflects_active_commands() {
        let dir = tempdir().unwrap();
        let hub = Hub::open(config_in(dir.path())).unwrap();
        hub.monitor.register("alice", CommandKind::Cmd, "whoami", 1).await;

        let snapshot = build_snapshot(&hub).await;
        assert!(snapshot.connected_clients.is_empty());
        assert_eq!(snapshot.active_commands.len(), 1);
        assert_eq!(snapshot.active_commands["alice"].command, "whoami");
    }

    #[tokio::test]
    async fn write_snapshot_persists_to_the_configured_path() {
        let dir = tempdir().unwrap();
        let hub = Hub::open(config_in(dir.path())).unwrap();
        write_snapshot(&hub).await;
        assert!(hub.config.snapshot_path().exists());
    }

    #[test]
    fn crash_log_appends_without_truncating() {
        let dir = tempdir().unwrap();
        let hub = Hub::open(config_in(dir.path())).unwrap();
        append_crash_log(&hub, "first");
        append_crash_log(&hub, "second");
        let content = std::fs::read_to_string(hub.config.crash_log_path()).unwrap();
        assert!(content.contains("first"));
        assert!(content.contains("second"));
    }
}
