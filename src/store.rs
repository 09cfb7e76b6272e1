use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Default streak-state file path.
pub const STATE_PATH: &str = "state.json";

/// Read a JSON file, treating a missing or corrupt file as absent. State and
/// cache files always cold-start instead of aborting the run.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

/// Read a JSON file, falling back to `T::default()` when missing or corrupt.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    read_json_opt(path).unwrap_or_default()
}

/// Write pretty-printed JSON atomically: temp file in the same directory,
/// then rename over the target. A kill mid-write leaves the old file intact.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let file_name = path
        .file_name()
        .with_context(|| format!("not a file path: {}", path.display()))?
        .to_string_lossy();
    let tmp = path.with_file_name(format!("{file_name}.tmp"));

    let contents = serde_json::to_string_pretty(value).context("failed to serialize JSON")?;
    std::fs::write(&tmp, contents)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn missing_file_reads_as_default() {
        let map: BTreeMap<String, u32> =
            read_json_or_default(Path::new("no/such/file.json"));
        assert!(map.is_empty());
    }

    #[test]
    fn corrupt_file_reads_as_default() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").expect("write");
        let map: BTreeMap<String, u32> = read_json_or_default(&path);
        assert!(map.is_empty());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("out/nested/state.json");
        let mut map = BTreeMap::new();
        map.insert("인터넷".to_string(), 3u32);
        write_json_atomic(&path, &map).expect("write");
        let loaded: BTreeMap<String, u32> = read_json_opt(&path).expect("present");
        assert_eq!(loaded, map);
    }

    #[test]
    fn rewrite_of_same_data_is_byte_identical() {
        let dir = tempfile::tempdir().expect("temp dir");
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        let mut map = BTreeMap::new();
        map.insert("k".to_string(), vec![1, 2, 3]);
        write_json_atomic(&a, &map).expect("write a");
        let loaded: BTreeMap<String, Vec<i32>> = read_json_opt(&a).expect("present");
        write_json_atomic(&b, &loaded).expect("write b");
        assert_eq!(
            std::fs::read(&a).expect("read a"),
            std::fs::read(&b).expect("read b")
        );
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("state.json");
        write_json_atomic(&path, &42u32).expect("write");
        assert!(!dir.path().join("state.json.tmp").exists());
    }
}
