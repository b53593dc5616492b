//! Small whole-file JSON snapshots (agents.json, leases.json): read the
//! whole array, rewrite the whole array via temp+rename. Unlike the JSONL
//! logs these have no meaningful append-only growth pattern -- the full
//! set is small and every mutation touches the set as a whole.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StoreError, StoreResult};

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Read a JSON array snapshot, treating a missing file as empty.
pub fn read<T: DeserializeOwned>(path: &Path) -> StoreResult<Vec<T>> {
    match std::fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Ok(Vec::new()),
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Rewrite a JSON array snapshot via temp+rename so concurrent readers
/// never observe a half-written file.
pub fn write<T: Serialize>(path: &Path, records: &[T]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(path, e))?;
    }
    let tmp_path: PathBuf = path.with_extension("json.tmp");
    {
        let mut tmp = File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
        let json = serde_json::to_string_pretty(records)?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| io_err(&tmp_path, e))?;
        tmp.sync_all().map_err(|e| io_err(&tmp_path, e))?;
    }
    std::fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Rec {
        id: u32,
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("snap.json");
        let records: Vec<Rec> = read(&path).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn write_then_read_roundtrips() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("snap.json");
        write(&path, &[Rec { id: 1 }, Rec { id: 2 }]).unwrap();
        let records: Vec<Rec> = read(&path).unwrap();
        assert_eq!(records, vec![Rec { id: 1 }, Rec { id: 2 }]);
    }

    #[test]
    fn write_leaves_no_temp_file_behind() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("snap.json");
        write(&path, &[Rec { id: 1 }]).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
    }
}
