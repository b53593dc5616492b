//! Append-only JSONL log with append-with-reload semantics (§4.1, §9).
//!
//! Every mutation is a single `O_APPEND` write of one line, fsynced before
//! the call returns. Readers detect external growth by comparing file
//! length/mtime against what they last saw and only parse the new tail,
//! so this stays cheap even as the log grows across a long process
//! lifetime. A trailing partial line (the process crashed mid-write) is
//! truncated away rather than treated as corruption. A line that parses as
//! neither -- well-formed JSON that doesn't match the record schema -- is
//! copied into a `.jsonl.quarantine` sibling and skipped, so an operator can
//! recover it without a corrupt record wedging the whole log.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StoreError, StoreResult};

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub struct AppendLog<T> {
    path: PathBuf,
    records: Vec<T>,
    offset: u64,
    modified: Option<SystemTime>,
}

impl<T: Serialize + DeserializeOwned + Clone> AppendLog<T> {
    /// Open (creating if absent) and load every well-formed record.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(&path, e))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;

        let mut log = Self {
            path,
            records: Vec::new(),
            offset: 0,
            modified: None,
        };
        log.reload_if_changed()?;
        Ok(log)
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line and fsync before returning.
    pub fn append(&mut self, record: T) -> StoreResult<()> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| io_err(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| io_err(&self.path, e))?;
        file.sync_all().map_err(|e| io_err(&self.path, e))?;

        self.offset += line.len() as u64;
        self.modified = std::fs::metadata(&self.path).ok().and_then(|m| m.modified().ok());
        self.records.push(record);
        Ok(())
    }

    /// Re-read the file if it grew or its mtime moved since we last looked,
    /// tolerating a trailing partial line left by a crashed writer.
    /// Returns whether anything new was picked up.
    pub fn reload_if_changed(&mut self) -> StoreResult<bool> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(io_err(&self.path, e)),
        };
        let len = metadata.len();
        let modified = metadata.modified().ok();

        if len == self.offset && modified == self.modified {
            return Ok(false);
        }
        if len < self.offset {
            // File was truncated/replaced out from under us; reload from scratch.
            self.records.clear();
            self.offset = 0;
        }

        let mut file = File::open(&self.path).map_err(|e| io_err(&self.path, e))?;
        file.seek(SeekFrom::Start(self.offset))
            .map_err(|e| io_err(&self.path, e))?;

        let mut reader = BufReader::new(file);
        let mut found_new = false;
        loop {
            let mut line = String::new();
            let bytes_read = reader
                .read_line(&mut line)
                .map_err(|e| io_err(&self.path, e))?;
            if bytes_read == 0 {
                break;
            }
            if !line.ends_with('\n') {
                // Partial trailing line: truncate it away on disk and stop.
                self.truncate_trailing_partial_line()?;
                break;
            }
            let trimmed = line.trim_end_matches('\n');
            if trimmed.is_empty() {
                self.offset += bytes_read as u64;
                continue;
            }
            match serde_json::from_str::<T>(trimmed) {
                Ok(record) => {
                    self.records.push(record);
                    found_new = true;
                }
                Err(err) => {
                    tracing::warn!(path = %self.path.display(), error = %err, "quarantining malformed JSONL record");
                    self.quarantine_line(trimmed)?;
                }
            }
            self.offset += bytes_read as u64;
        }

        self.modified = std::fs::metadata(&self.path)
            .ok()
            .and_then(|m| m.modified().ok());
        Ok(found_new)
    }

    /// Sibling file a malformed record is copied into so an operator can
    /// inspect and recover it later (§7 "malformed persisted records are
    /// quarantined, not deleted").
    pub fn quarantine_path(&self) -> PathBuf {
        self.path.with_extension("jsonl.quarantine")
    }

    fn quarantine_line(&self, line: &str) -> StoreResult<()> {
        let path = self.quarantine_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        writeln!(file, "{line}").map_err(|e| io_err(&path, e))?;
        file.sync_all().map_err(|e| io_err(&path, e))
    }

    fn truncate_trailing_partial_line(&self) -> StoreResult<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| io_err(&self.path, e))?;
        file.set_len(self.offset).map_err(|e| io_err(&self.path, e))?;
        file.sync_all().map_err(|e| io_err(&self.path, e))?;
        tracing::warn!(path = %self.path.display(), "truncated trailing partial JSONL record");
        Ok(())
    }

    /// Rewrite the whole log from an in-memory snapshot (used after an
    /// in-place update to a record, since JSONL itself has no update-in-place
    /// primitive). Writes via temp+rename so a reader never observes a
    /// half-written file.
    pub fn rewrite_all(&mut self, records: Vec<T>) -> StoreResult<()> {
        let tmp_path = self.path.with_extension("jsonl.tmp");
        {
            let mut tmp = File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
            for record in &records {
                let mut line = serde_json::to_string(record)?;
                line.push('\n');
                tmp.write_all(line.as_bytes())
                    .map_err(|e| io_err(&tmp_path, e))?;
            }
            tmp.sync_all().map_err(|e| io_err(&tmp_path, e))?;
        }
        std::fs::rename(&tmp_path, &self.path).map_err(|e| io_err(&self.path, e))?;

        let metadata = std::fs::metadata(&self.path).map_err(|e| io_err(&self.path, e))?;
        self.offset = metadata.len();
        self.modified = metadata.modified().ok();
        self.records = records;
        Ok(())
    }

    /// Read every byte currently in the backing file, ignoring what we've
    /// cached -- used sparingly (e.g. a forced full rescan after suspected
    /// external truncation).
    #[cfg(test)]
    pub fn raw_contents(&self) -> StoreResult<String> {
        let mut s = String::new();
        File::open(&self.path)
            .map_err(|e| io_err(&self.path, e))?
            .read_to_string(&mut s)
            .map_err(|e| io_err(&self.path, e))?;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Rec {
        id: u32,
        name: String,
    }

    #[test]
    fn append_and_reopen_preserves_records() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("log.jsonl");

        let mut log = AppendLog::<Rec>::open(&path).unwrap();
        log.append(Rec { id: 1, name: "a".into() }).unwrap();
        log.append(Rec { id: 2, name: "b".into() }).unwrap();

        let reopened = AppendLog::<Rec>::open(&path).unwrap();
        assert_eq!(reopened.records().len(), 2);
        assert_eq!(reopened.records()[1].name, "b");
    }

    #[test]
    fn reload_picks_up_external_append() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("log.jsonl");
        let mut log = AppendLog::<Rec>::open(&path).unwrap();
        log.append(Rec { id: 1, name: "a".into() }).unwrap();

        // Simulate an external writer (web UI / CLI) appending a line directly.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, r#"{{"id":2,"name":"external"}}"#).unwrap();
        drop(file);

        let changed = log.reload_if_changed().unwrap();
        assert!(changed);
        assert_eq!(log.records().len(), 2);
        assert_eq!(log.records()[1].name, "external");
    }

    #[test]
    fn trailing_partial_line_is_truncated_not_treated_as_corrupt() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("log.jsonl");
        let mut log = AppendLog::<Rec>::open(&path).unwrap();
        log.append(Rec { id: 1, name: "a".into() }).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        // No trailing newline: simulates a crash mid-write.
        write!(file, r#"{{"id":2,"name":"b""#).unwrap();
        drop(file);

        let changed = log.reload_if_changed().unwrap();
        assert!(!changed);
        assert_eq!(log.records().len(), 1);

        let contents = log.raw_contents().unwrap();
        assert!(!contents.ends_with("\"b\""));
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn malformed_line_is_quarantined_not_deleted() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("log.jsonl");
        std::fs::write(&path, "not json\n{\"id\":1,\"name\":\"ok\"}\n").unwrap();

        let log = AppendLog::<Rec>::open(&path).unwrap();
        assert_eq!(log.records().len(), 1);
        assert_eq!(log.records()[0].id, 1);

        let quarantined = std::fs::read_to_string(log.quarantine_path()).unwrap();
        assert_eq!(quarantined.trim_end(), "not json");
    }

    #[test]
    fn rewrite_all_replaces_contents_atomically() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("log.jsonl");
        let mut log = AppendLog::<Rec>::open(&path).unwrap();
        log.append(Rec { id: 1, name: "a".into() }).unwrap();
        log.append(Rec { id: 2, name: "b".into() }).unwrap();

        log.rewrite_all(vec![Rec { id: 2, name: "b-renamed".into() }])
            .unwrap();

        assert_eq!(log.records().len(), 1);
        let reopened = AppendLog::<Rec>::open(&path).unwrap();
        assert_eq!(reopened.records().len(), 1);
        assert_eq!(reopened.records()[0].name, "b-renamed");
    }
}
