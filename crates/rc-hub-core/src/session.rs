use crate::hub::Hub;
use crate::monitor::ResultOutcome;
use crate::transfer_ops::push_import;
use rc_proto::output::decode_chunk;
use rc_proto::transfer::{receive_file, resolve_dest_path};
use rc_proto::{FrameReader, FrameWriter};
use rc_types::models::CommandKind;
use rc_types::target::substitute_user_placeholder;
use rc_types::wire::{BatchStart, FileMeta};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const EXPORT_META_TIMEOUT: Duration = Duration::from_secs(30);
const EXPORT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_WARN_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_CONSECUTIVE_ERRORS: u32 = 5;
/// Delay between two `FILETRU:` lines of a replayed `SIMPL` batch, giving the
/// agent time to drain each one — mirrors the originating implementation's
/// pacing so a fast hub never outruns a slow agent's line buffer.
const SIMPL_LINE_DELAY: Duration = Duration::from_millis(200);

/// Runs one agent connection end to end: handshake, deferred-command replay,
/// then the frame dispatch loop, until the connection closes or is kicked.
pub async fn run_agent_session(stream: TcpStream, hub: Arc<Hub>) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let writer = FrameWriter::new(write_half);

    let id = match tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.read_line()).await {
        Ok(Ok(Some(line))) if !line.is_empty() => line,
        Ok(Ok(_)) => {
            debug!("handshake produced an empty id, closing");
            return;
        }
        Ok(Err(e)) => {
            warn!(error = %e, "handshake read failed");
            return;
        }
        Err(_) => {
            warn!("handshake timed out after {HANDSHAKE_TIMEOUT:?}");
            return;
        }
    };

    let alias = match hub.users.register(&id) {
        Ok(alias) => alias,
        Err(e) => {
            warn!(agent = %id, error = %e, "failed to register user");
            return;
        }
    };

    hub.live.insert(id.clone(), writer.clone()).await;
    info!(agent = %id, %alias, "agent connected");

    replay_deferred_commands(&hub, &id, &writer).await;

    run_read_loop(&hub, &id, &alias, &mut reader, &writer).await;

    hub.monitor.unregister(&id).await;
    hub.monitor.clear_deferred_pending(&id).await;
    hub.live.remove(&id).await;
    if let Err(e) = hub.users.logout(&id) {
        warn!(agent = %id, error = %e, "failed to record logout");
    }
    info!(agent = %id, "agent disconnected");
}

/// Replays every deferred command that expects `id`, in creation order. Each
/// kind reuses the exact wire frames the operator console would send for a
/// live dispatch, so an agent that was offline when a command was issued
/// sees the same protocol on reconnect.
async fn replay_deferred_commands(hub: &Arc<Hub>, id: &str, writer: &FrameWriter) {
    let pending = hub.deferred.for_user(id);
    if pending.is_empty() {
        return;
    }
    info!(agent = %id, count = pending.len(), "replaying deferred commands");

    for (index, record) in pending {
        match record.kind {
            CommandKind::Cmd => {
                let Some(command) = record.command.as_deref() else { continue };
                let command = substitute_user_placeholder(command, id);
                hub.monitor.register(id, CommandKind::Cmd, command.clone(), 1).await;
                if writer.write_line(&format!("CMD:{command}")).await.is_err() {
                    hub.monitor.unregister(id).await;
                    continue;
                }
                hub.monitor.push_deferred_pending(id, index).await;
            }
            CommandKind::Simpl => {
                let commands = match read_script_lines(&hub.config.simpl_script_path()) {
                    Ok(lines) if !lines.is_empty() => lines,
                    Ok(_) => {
                        warn!(agent = %id, "simpl script is empty, skipping deferred replay");
                        continue;
                    }
                    Err(e) => {
                        warn!(agent = %id, error = %e, "could not read simpl script for deferred replay");
                        continue;
                    }
                };
                hub.monitor
                    .register(id, CommandKind::Simpl, format!("simpl ({} commands)", commands.len()), commands.len() as u32)
                    .await;
                for line in &commands {
                    let line = substitute_user_placeholder(line, id);
                    if writer.write_line(&format!("FILETRU:{line}")).await.is_err() {
                        break;
                    }
                    tokio::time::sleep(SIMPL_LINE_DELAY).await;
                }
                hub.monitor.push_deferred_pending(id, index).await;
            }
            CommandKind::Import => {
                let (Some(source), Some(dest)) = (record.source_path.as_deref(), record.dest_path.as_deref()) else {
                    continue;
                };
                let source = substitute_user_placeholder(source, id);
                let dest = substitute_user_placeholder(dest, id);
                hub.monitor.register(id, CommandKind::Import, format!("import {source}"), 1).await;
                let outcome = push_import(writer, &source, &dest).await;
                hub.monitor.unregister(id).await;
                let message = match outcome {
                    Ok(()) => format!("IMPORT: {source} -> {dest} [OK]"),
                    Err(e) => format!("IMPORT: {source} -> {dest} [FAILED: {e}]"),
                };
                if let Err(e) = hub.deferred.mark_completed(index, id, &message) {
                    warn!(agent = %id, error = %e, "failed to credit deferred import");
                }
            }
            CommandKind::Export => {
                let (Some(source), Some(dest)) = (record.source_path.as_deref(), record.dest_path.as_deref()) else {
                    continue;
                };
                let source = substitute_user_placeholder(source, id);
                let dest = substitute_user_placeholder(dest, id);
                hub.monitor.register(id, CommandKind::Export, format!("export {source}"), 1).await;
                if writer.write_line(&format!("EXPORT;{source};{dest}")).await.is_err() {
                    hub.monitor.unregister(id).await;
                    continue;
                }
                hub.monitor.push_deferred_pending(id, index).await;
            }
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
}

fn read_script_lines(path: &Path) -> std::io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
}

async fn run_read_loop(hub: &Arc<Hub>, id: &str, alias: &str, reader: &mut FrameReader, writer: &FrameWriter) {
    let mut consecutive_errors = 0u32;
    let mut chunk_lines: Vec<String> = Vec::new();

    loop {
        let line = match tokio::time::timeout(IDLE_WARN_TIMEOUT, reader.read_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                debug!(agent = %id, "peer closed the connection");
                break;
            }
            Ok(Err(e)) => {
                info!(agent = %id, error = %e, "connection error, closing session");
                break;
            }
            Err(_) => {
                warn!(agent = %id, "no activity for {IDLE_WARN_TIMEOUT:?}");
                continue;
            }
        };

        if line.is_empty() {
            continue;
        }
        consecutive_errors = 0;

        if let Some(rest) = line.strip_prefix("EXPORT:START:") {
            if let Err(e) = handle_export_start(hub, id, alias, rest, reader, writer).await {
                warn!(agent = %id, error = %e, "export batch failed");
                hub.monitor.unregister(id).await;
                hub.monitor.clear_deferred_pending(id).await;
                consecutive_errors += 1;
            }
        } else if line == "IMPORT:COMPLETE" {
            info!(agent = %id, "agent reports import complete");
            hub.monitor.unregister(id).await;
        } else if let Some(msg) = line.strip_prefix("IMPORT:ERROR:") {
            warn!(agent = %id, error = %msg, "agent reports import error");
            hub.monitor.unregister(id).await;
        } else if line.starts_with("OUTPUT:START:") {
            chunk_lines.clear();
            warn_if_total_degraded(id, &line);
        } else if let Some(payload) = line.strip_prefix("OUTPUT:CHUNK:") {
            chunk_lines.push(decode_chunk(payload));
        } else if line == "OUTPUT:END" {
            finish_result_stream(hub, id, CommandKind::Cmd, &mut chunk_lines).await;
        } else if line.starts_with("FILETRU:START:") {
            chunk_lines.clear();
            warn_if_total_degraded(id, &line);
        } else if let Some(payload) = line.strip_prefix("FILETRU:CHUNK:") {
            chunk_lines.push(decode_chunk(payload));
        } else if line == "FILETRU:END" {
            finish_result_stream(hub, id, CommandKind::Simpl, &mut chunk_lines).await;
        } else {
            warn!(agent = %id, frame = %line, "unknown frame, ignoring");
        }

        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
            warn!(agent = %id, "too many consecutive protocol errors, dropping session");
            break;
        }
    }
}

/// `…:START:<n>` tolerates a non-integer or missing tail (§9): `n` is purely
/// informational here, but a degraded parse is still worth a log line.
fn warn_if_total_degraded(id: &str, start_line: &str) {
    if rc_proto::output::parse_total(start_line) == 0 && !start_line.ends_with(":0") {
        warn!(agent = %id, frame = %start_line, "could not parse chunk total, treating as 0");
    }
}

async fn finish_result_stream(hub: &Arc<Hub>, id: &str, kind: CommandKind, chunk_lines: &mut Vec<String>) {
    let full_output = chunk_lines.join("\n");
    chunk_lines.clear();
    hub.last_output.set(id, full_output.clone(), kind).await;
    info!(agent = %id, "result received:\n{full_output}");

    match hub.monitor.record_result(id, full_output).await {
        None => {
            warn!(agent = %id, "result arrived with no in-flight command, ignoring");
        }
        Some(ResultOutcome::AwaitingMore) => {}
        Some(ResultOutcome::Finished { combined, kind, command_text, deferred_index }) => {
            if let Err(e) = save_command_output(hub, id, &command_text, &combined, kind) {
                warn!(agent = %id, error = %e, "failed to persist command output");
            }
            if let Some(index) = deferred_index {
                if let Err(e) = hub.deferred.mark_completed(index, id, &combined) {
                    warn!(agent = %id, error = %e, "failed to credit deferred command");
                }
            }
        }
    }
}

fn save_command_output(hub: &Hub, id: &str, command: &str, output: &str, kind: CommandKind) -> anyhow::Result<()> {
    use std::io::Write;
    let alias = hub
        .users
        .with_state(|state| state.users.get(id).map(|u| u.alias.clone()))
        .unwrap_or_else(|| id.to_string());
    let path = hub.config.command_output_dir().join(format!("output_command_{alias}.txt"));
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let kind_label = match kind {
        CommandKind::Cmd => "CMD",
        CommandKind::Simpl => "SIMPL",
        CommandKind::Import => "IMPORT",
        CommandKind::Export => "EXPORT",
    };
    writeln!(
        file,
        "Time: {}\nCommand: {command}\nKind: {kind_label}\n{sep}\n{output}\n{sep}\n",
        chrono::Utc::now().to_rfc3339(),
        sep = "=".repeat(80),
    )?;
    Ok(())
}

async fn handle_export_start(
    hub: &Arc<Hub>,
    id: &str,
    alias: &str,
    json: &str,
    reader: &mut FrameReader,
    writer: &FrameWriter,
) -> anyhow::Result<()> {
    let batch: BatchStart = serde_json::from_str(json)?;
    let dest_base = hub.config.files_dir().join(alias).join(&batch.dest_dir);

    let mut received = 0u32;
    for _ in 0..batch.count {
        let meta_line = match tokio::time::timeout(EXPORT_META_TIMEOUT, reader.read_line()).await {
            Ok(Ok(Some(line))) => line,
            _ => {
                let _ = writer.write_line("EXPORT:ABORT").await;
                anyhow::bail!("timed out or disconnected waiting for FILE:META");
            }
        };
        let Some(meta_json) = meta_line.strip_prefix("FILE:META:") else {
            let _ = writer.write_line("EXPORT:ABORT").await;
            anyhow::bail!("expected FILE:META, got {meta_line}");
        };
        let meta: FileMeta = serde_json::from_str(meta_json)?;
        let dest_path = resolve_dest_path(&dest_base, &meta.rel_path, batch.count);

        if let Err(e) = receive_file(reader, &dest_path, meta.size).await {
            let _ = writer.write_line("EXPORT:ABORT").await;
            anyhow::bail!("receiving {}: {e}", meta.rel_path);
        }
        received += 1;
    }

    let confirm = tokio::time::timeout(EXPORT_CONFIRM_TIMEOUT, reader.read_line()).await;
    match confirm {
        Ok(Ok(Some(line))) if line == "EXPORT:COMPLETE" => {
            info!(agent = %id, received, "export batch complete");
            if let Some(index) = pop_export_deferred(hub, id).await {
                let message = format!("EXPORT: {received} files [OK]");
                hub.deferred.mark_completed(index, id, &message)?;
            }
            hub.monitor.unregister(id).await;
            Ok(())
        }
        Ok(Ok(Some(other))) => anyhow::bail!("expected EXPORT:COMPLETE, got {other}"),
        Ok(Ok(None)) => anyhow::bail!("connection closed waiting for EXPORT:COMPLETE"),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => anyhow::bail!("timed out waiting for EXPORT:COMPLETE"),
    }
}

async fn pop_export_deferred(hub: &Arc<Hub>, id: &str) -> Option<u64> {
    hub.monitor.pop_deferred_pending(id).await
}
