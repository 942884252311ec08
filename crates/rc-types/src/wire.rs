use serde::{Deserialize, Serialize};

/// `FILE:META:<json>` payload, either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    pub rel_path: String,
    pub size: u64,
}

/// `EXPORT:START:<json>` / `IMPORT:START:<json>` batch header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStart {
    pub count: u32,
    pub dest_dir: String,
    pub source: String,
}

pub const FILE_END_MARKER: &str = "FILE:END";
pub const NEWLINE_ESCAPE: &str = "<<<NL>>>";
pub const OUTPUT_CHUNK_LINES: usize = 100;
