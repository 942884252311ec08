use rc_proto::transfer::{list_files, receive_file, resolve_dest_path, send_file};
use rc_proto::{FrameReader, FrameWriter};
use rc_types::wire::{BatchStart, FileMeta};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Services an `EXPORT;src;dest` request: walks `source_path` locally and
/// streams every file back out as `EXPORT:START`/`FILE:META`+body/`EXPORT:COMPLETE`.
pub async fn handle_export(writer: &FrameWriter, source_path: &str, dest_dir: &str) {
    let source = Path::new(source_path);
    let files = match list_files(source) {
        Ok(files) if !files.is_empty() => files,
        Ok(_) => {
            let _ = writer.write_line(&format!("EXPORT:ERROR:no files found under {source_path}")).await;
            return;
        }
        Err(e) => {
            let _ = writer.write_line(&format!("EXPORT:ERROR:{e}")).await;
            return;
        }
    };

    let batch = BatchStart {
        count: files.len() as u32,
        dest_dir: dest_dir.to_string(),
        source: source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| source_path.to_string()),
    };
    let meta_json = match serde_json::to_string(&batch) {
        Ok(json) => json,
        Err(e) => {
            let _ = writer.write_line(&format!("EXPORT:ERROR:{e}")).await;
            return;
        }
    };
    if writer.write_line(&format!("EXPORT:START:{meta_json}")).await.is_err() {
        return;
    }

    for file in &files {
        if let Err(e) = send_file(writer, file).await {
            warn!(error = %e, file = %file.rel_path, "export aborted mid-file");
            let _ = writer.write_line("EXPORT:ABORT").await;
            return;
        }
    }

    let _ = writer.write_line("EXPORT:COMPLETE").await;
    info!(count = files.len(), "export complete");
}

/// Receives an inbound file push. `start_line` is the already-read
/// `IMPORT:START:<json>` line that triggered this call; every subsequent
/// `FILE:META`/body pair is read off the same frame buffer as the text
/// frames, per the critical single-queue invariant.
pub async fn handle_import(reader: &mut FrameReader, writer: &FrameWriter, start_line: &str) {
    let Some(json) = start_line.strip_prefix("IMPORT:START:") else {
        let _ = writer.write_line("IMPORT:ERROR:malformed start frame").await;
        return;
    };
    let batch: BatchStart = match serde_json::from_str(json) {
        Ok(batch) => batch,
        Err(e) => {
            let _ = writer.write_line(&format!("IMPORT:ERROR:{e}")).await;
            return;
        }
    };

    let dest_base = PathBuf::from(&batch.dest_dir);
    for _ in 0..batch.count {
        let meta_line = match reader.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                let _ = writer.write_line("IMPORT:ERROR:connection closed mid-transfer").await;
                return;
            }
            Err(e) => {
                let _ = writer.write_line(&format!("IMPORT:ERROR:{e}")).await;
                return;
            }
        };
        let Some(meta_json) = meta_line.strip_prefix("FILE:META:") else {
            let _ = writer
                .write_line(&format!("IMPORT:ERROR:expected FILE:META, got {meta_line}"))
                .await;
            return;
        };
        let meta: FileMeta = match serde_json::from_str(meta_json) {
            Ok(meta) => meta,
            Err(e) => {
                let _ = writer.write_line(&format!("IMPORT:ERROR:{e}")).await;
                return;
            }
        };
        let dest_path = resolve_dest_path(&dest_base, &meta.rel_path, batch.count);
        if let Err(e) = receive_file(reader, &dest_path, meta.size).await {
            let _ = writer.write_line(&format!("IMPORT:ERROR:{e}")).await;
            return;
        }
    }

    let _ = writer.write_line("IMPORT:COMPLETE").await;
    info!(count = batch.count, "import complete");
}
