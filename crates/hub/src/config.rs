use rc_hub_core::HubConfig;
use std::path::PathBuf;

/// Reads `HUB_*` environment variables into a `HubConfig`, falling back to
/// the listener defaults the distilled protocol assumes (`0.0.0.0:9000`).
/// An unwritable data directory is fatal and aborts before the listener
/// binds, the same way the teacher aborts on a placeholder JWT secret.
pub fn load_from_env() -> HubConfig {
    let bind_host = std::env::var("HUB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let bind_port = std::env::var("HUB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(9000);
    let data_dir: PathBuf = std::env::var("HUB_DATA_DIR")
        .unwrap_or_else(|_| "./hub_data".to_string())
        .into();
    let operator_console_enabled = std::env::var("HUB_CONSOLE")
        .ok()
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(true);
    let snapshot_interval_secs = std::env::var("HUB_SNAPSHOT_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("FATAL: HUB_DATA_DIR {} is not writable: {e}", data_dir.display());
        std::process::exit(1);
    }

    HubConfig {
        bind_host,
        bind_port,
        data_dir,
        operator_console_enabled,
        snapshot_interval_secs,
    }
}
