use anyhow::{Context, Result};
use rc_proto::transfer::{list_files, send_file};
use rc_proto::FrameWriter;
use rc_types::wire::BatchStart;
use std::path::Path;

/// Pushes a file or directory from the hub to a connected agent: announces
/// the batch with `IMPORT:START:<json>`, then streams each file as a
/// `FILE:META`/body/`FILE:END` triple. Per the design's open-question
/// decision, the caller credits any deferred record immediately after this
/// returns `Ok` — it does not wait for the agent's `IMPORT:COMPLETE`.
pub async fn push_import(writer: &FrameWriter, source_path: &str, dest_path: &str) -> Result<()> {
    let source = Path::new(source_path);
    let files = list_files(source).context("listing files for import push")?;

    let batch = BatchStart {
        count: files.len() as u32,
        dest_dir: dest_path.to_string(),
        source: source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| source_path.to_string()),
    };
    writer
        .write_line(&format!("IMPORT:START:{}", serde_json::to_string(&batch)?))
        .await?;

    for file in &files {
        send_file(writer, file).await?;
    }
    Ok(())
}

/// Asks a connected agent to push files to the hub: just the `EXPORT;src;dest`
/// request line. The hub's agent session main loop receives the resulting
/// `EXPORT:START:<json>` batch and the file bodies that follow it.
pub async fn send_export_request(writer: &FrameWriter, source_path: &str, dest_dir: &str) -> Result<()> {
    writer
        .write_line(&format!("EXPORT;{source_path};{dest_dir}"))
        .await?;
    Ok(())
}
