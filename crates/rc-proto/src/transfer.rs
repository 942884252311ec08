use crate::error::TransferError;
use crate::frame::{FrameReader, FrameWriter};
use rc_types::wire::{FileMeta, FILE_END_MARKER};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::warn;
use walkdir::WalkDir;

/// Chunk size for both directions' file bodies, matching the wire-format
/// constant carried over from the distilled protocol.
pub const MAX_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub abs_path: PathBuf,
    pub rel_path: String,
    pub size: u64,
}

/// Lists the files under `path`: a single entry if it's a regular file, or
/// one entry per regular file found by a recursive walk if it's a
/// directory. Traversal order is `walkdir`'s and is stable but otherwise
/// unspecified.
pub fn list_files(path: &Path) -> Result<Vec<FileEntry>, TransferError> {
    if !path.exists() {
        return Err(TransferError::SourceMissing(path.display().to_string()));
    }

    if path.is_file() {
        let size = path.metadata()?.len();
        let rel_path = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        return Ok(vec![FileEntry {
            abs_path: path.to_path_buf(),
            rel_path,
            size,
        }]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let abs_path = entry.path().to_path_buf();
        let rel_path = match abs_path.strip_prefix(path) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(FileEntry {
            abs_path,
            rel_path,
            size,
        });
    }
    Ok(files)
}

/// Sends one file: a `FILE:META` header, the raw bytes in `MAX_CHUNK_BYTES`
/// blocks streamed straight off disk, then a `FILE:END` marker. Zero-byte
/// files skip the data read entirely.
pub async fn send_file(writer: &FrameWriter, entry: &FileEntry) -> Result<(), TransferError> {
    let meta = FileMeta {
        rel_path: entry.rel_path.clone(),
        size: entry.size,
    };
    writer
        .write_line(&format!("FILE:META:{}", serde_json::to_string(&meta)?))
        .await?;

    if entry.size > 0 {
        let mut file = fs::File::open(&entry.abs_path).await?;
        let mut buf = vec![0u8; MAX_CHUNK_BYTES];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_bytes(&buf[..n]).await?;
        }
    }

    writer.write_line(FILE_END_MARKER).await?;
    Ok(())
}

/// Receives one file announced by a prior `FILE:META` line: reads exactly
/// `size` bytes into `dest_path` (creating parent directories as needed),
/// then consumes and checks the trailing `FILE:END` marker.
pub async fn receive_file(
    reader: &mut FrameReader,
    dest_path: &Path,
    size: u64,
) -> Result<(), TransferError> {
    if let Some(parent) = dest_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut file = fs::File::create(dest_path).await?;
    let mut remaining = size as usize;
    while remaining > 0 {
        let take = remaining.min(MAX_CHUNK_BYTES);
        let chunk = reader.read_exact(take).await?;
        file.write_all(&chunk).await?;
        remaining -= take;
    }
    file.flush().await?;

    match reader.read_line().await? {
        Some(line) if line.starts_with(FILE_END_MARKER) => {}
        Some(other) => warn!(marker = %other, "unexpected marker after file body"),
        None => {
            return Err(TransferError::UnexpectedFrame {
                expected: FILE_END_MARKER.to_string(),
                got: "<eof>".to_string(),
            });
        }
    }
    Ok(())
}

/// Resolves where one file of a batch should land: if the batch has exactly
/// one file and `dest_dir` carries a file extension, the whole batch writes
/// to that exact path; otherwise each file lands at `dest_dir/rel_path`.
pub fn resolve_dest_path(dest_dir: &Path, rel_path: &str, batch_count: u32) -> PathBuf {
    if batch_count == 1 && dest_dir.extension().is_some() {
        dest_dir.to_path_buf()
    } else {
        dest_dir.join(rel_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn single_file_dest_is_respected_for_extensioned_target() {
        let dest = PathBuf::from("/opt/y.bin");
        assert_eq!(resolve_dest_path(&dest, "x.bin", 1), PathBuf::from("/opt/y.bin"));
    }

    #[test]
    fn directory_dest_joins_rel_path() {
        let dest = PathBuf::from("/opt/out");
        assert_eq!(
            resolve_dest_path(&dest, "sub/x.bin", 2),
            PathBuf::from("/opt/out/sub/x.bin")
        );
    }

    #[test]
    fn list_files_single_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hi").unwrap();
        let files = list_files(&path).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "a.txt");
        assert_eq!(files[0].size, 2);
    }

    #[test]
    fn list_files_directory_is_recursive() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"12345").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let mut files = list_files(dir.path()).unwrap();
        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].rel_path, "a.txt");
        assert_eq!(files[1].rel_path, "sub/b.txt");
    }
}
