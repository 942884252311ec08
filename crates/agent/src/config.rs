use std::time::Duration;

/// Agent-side configuration, analogous to the hub's `HubConfig`: a plain
/// struct read by hand from `AGENT_*` environment variables rather than
/// `clap`-derived, since this is a long-lived daemon and not a one-shot CLI.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub hub_host: String,
    pub hub_port: u16,
    pub client_id: String,
    pub reconnect_delay: Duration,
    pub command_timeout: Duration,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let hub_host = std::env::var("AGENT_HUB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let hub_port = std::env::var("AGENT_HUB_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(9000);
        let client_id = std::env::var("AGENT_ID")
            .or_else(|_| std::env::var("USERNAME"))
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "unknown".to_string());
        let reconnect_delay = Duration::from_secs(
            std::env::var("AGENT_RECONNECT_DELAY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        );
        let command_timeout = Duration::from_secs(
            std::env::var("AGENT_COMMAND_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        );

        Self {
            hub_host,
            hub_port,
            client_id,
            reconnect_delay,
            command_timeout,
        }
    }
}
