use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tempfile::NamedTempFile;

/// Serializes `value` to JSON and replaces `path` atomically: the new
/// content lands in a temp file in the same directory first, then is
/// renamed into place, so a crash mid-write never corrupts the previous
/// good copy.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().context("path has no parent directory")?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.persist(path)
        .with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

/// Loads JSON from `path`, or `T::default()` if the file doesn't exist or
/// fails to parse (the teacher's stores are similarly tolerant of a missing
/// or corrupt file on first run rather than treating it as fatal).
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let Ok(bytes) = std::fs::read(path) else {
        return T::default();
    };
    serde_json::from_slice(&bytes).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut map = HashMap::new();
        map.insert("a".to_string(), 1u32);
        write_json(&path, &map).unwrap();
        let loaded: HashMap<String, u32> = read_json_or_default(&path);
        assert_eq!(loaded, map);
    }

    #[test]
    fn interrupted_write_leaves_original_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_json(&path, &vec![1, 2, 3]).unwrap();

        // Simulate an interrupted write: create the temp file but never
        // persist() it into place.
        let _tmp = NamedTempFile::new_in(dir.path()).unwrap();

        let loaded: Vec<i32> = read_json_or_default(&path);
        assert_eq!(loaded, vec![1, 2, 3]);
    }
}
