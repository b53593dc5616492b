//! Inbox/outbox/archive message persistence (§4.4).
//!
//! Each message is one file, named `<msgId>.json`, living in exactly one
//! of: an agent's inbox (direct messages awaiting delivery), the shared
//! outbox (broadcasts, which persist after delivery so other agents can
//! still see them), or the archive (direct messages that have been
//! delivered). A malformed or empty file found while scanning is
//! quarantined in place by renaming it with a `malformed-` prefix rather
//! than deleted, so an operator can recover it.
//!
//! Per-agent broadcast delivery is tracked by a processed-id cursor file
//! under `mail/cursors/<agentId>.json` -- an internal bookkeeping file,
//! not part of the external contract in §6, but required by the
//! at-least-once/idempotent-handler delivery model in §4.4/§9.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};
use crate::models::Message;
use crate::paths::Layout;

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub struct MessageStore {
    layout: Layout,
}

/// A message read off disk together with where it came from, which
/// determines what happens to it after delivery (archive vs. cursor
/// advance).
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    pub message: Message,
    pub source: MessageSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSource {
    Inbox,
    Outbox,
}

impl MessageStore {
    pub fn new(layout: Layout) -> StoreResult<Self> {
        layout.ensure_dirs().map_err(|e| io_err(&layout.mail_dir(), e))?;
        Ok(Self { layout })
    }

    fn message_path(message: &Message, dir: &Path) -> PathBuf {
        dir.join(format!("{}.json", message.id))
    }

    fn write_message(path: &Path, message: &Message) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let json = serde_json::to_string_pretty(message)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| io_err(path, e))?;
        file.write_all(json.as_bytes()).map_err(|e| io_err(path, e))?;
        file.sync_all().map_err(|e| io_err(path, e))?;
        Ok(())
    }

    /// Publish: direct messages go to the recipient's inbox, broadcasts go
    /// to the shared outbox.
    pub fn publish(&self, message: &Message) -> StoreResult<()> {
        let dir = match &message.to {
            Some(agent_id) => self.layout.inbox_dir(agent_id),
            None => self.layout.outbox_dir(),
        };
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        Self::write_message(&Self::message_path(message, &dir), message)
    }

    fn cursor_path(&self, agent_id: &str) -> PathBuf {
        self.layout.mail_dir().join("cursors").join(format!("{agent_id}.json"))
    }

    fn load_cursor(&self, agent_id: &str) -> StoreResult<BTreeSet<String>> {
        let path = self.cursor_path(agent_id);
        match std::fs::read_to_string(&path) {
            Ok(s) if s.trim().is_empty() => Ok(BTreeSet::new()),
            Ok(s) => Ok(serde_json::from_str(&s)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    fn save_cursor(&self, agent_id: &str, cursor: &BTreeSet<String>) -> StoreResult<()> {
        let path = self.cursor_path(agent_id);
        crate::snapshot::write(&path, &cursor.iter().collect::<Vec<_>>())
    }

    fn read_message_file(path: &Path) -> StoreResult<Option<Message>> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        if contents.trim().is_empty() {
            Self::quarantine(path)?;
            return Ok(None);
        }
        match serde_json::from_str::<Message>(&contents) {
            Ok(m) => Ok(Some(m)),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "quarantining malformed message");
                Self::quarantine(path)?;
                Ok(None)
            }
        }
    }

    fn quarantine(path: &Path) -> StoreResult<()> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.json");
        let target = path.with_file_name(format!("malformed-{file_name}"));
        std::fs::rename(path, &target).map_err(|e| io_err(path, e))
    }

    /// One polling tick for `agent_id`: every undelivered inbox message,
    /// plus every outbox broadcast not yet in this agent's processed
    /// cursor. Does not archive or advance the cursor -- call
    /// `complete_delivery` once the caller's handlers have run.
    pub fn receive(&self, agent_id: &str) -> StoreResult<Vec<DeliveredMessage>> {
        let mut delivered = Vec::new();

        let inbox_dir = self.layout.inbox_dir(agent_id);
        std::fs::create_dir_all(&inbox_dir).map_err(|e| io_err(&inbox_dir, e))?;
        for entry in std::fs::read_dir(&inbox_dir).map_err(|e| io_err(&inbox_dir, e))? {
            let entry = entry.map_err(|e| io_err(&inbox_dir, e))?;
            if !is_message_file(&entry.path()) {
                continue;
            }
            if let Some(message) = Self::read_message_file(&entry.path())? {
                delivered.push(DeliveredMessage {
                    message,
                    source: MessageSource::Inbox,
                });
            }
        }

        let cursor = self.load_cursor(agent_id)?;
        let outbox_dir = self.layout.outbox_dir();
        for entry in std::fs::read_dir(&outbox_dir).map_err(|e| io_err(&outbox_dir, e))? {
            let entry = entry.map_err(|e| io_err(&outbox_dir, e))?;
            if !is_message_file(&entry.path()) {
                continue;
            }
            if let Some(message) = Self::read_message_file(&entry.path())? {
                if message.from == agent_id || cursor.contains(&message.id) {
                    continue;
                }
                delivered.push(DeliveredMessage {
                    message,
                    source: MessageSource::Outbox,
                });
            }
        }

        Ok(delivered)
    }

    /// After handlers run for a delivered message: archive inbox entries,
    /// advance the outbox cursor for broadcasts.
    pub fn complete_delivery(&self, agent_id: &str, delivered: &DeliveredMessage) -> StoreResult<()> {
        match delivered.source {
            MessageSource::Inbox => {
                let from = self
                    .layout
                    .inbox_dir(agent_id)
                    .join(format!("{}.json", delivered.message.id));
                let archive_dir = self.layout.archive_dir();
                std::fs::create_dir_all(&archive_dir).map_err(|e| io_err(&archive_dir, e))?;
                let to = archive_dir.join(format!("{}.json", delivered.message.id));
                if from.exists() {
                    std::fs::rename(&from, &to).map_err(|e| io_err(&from, e))?;
                }
            }
            MessageSource::Outbox => {
                let mut cursor = self.load_cursor(agent_id)?;
                cursor.insert(delivered.message.id.clone());
                self.save_cursor(agent_id, &cursor)?;
            }
        }
        Ok(())
    }

    fn find_message_path(&self, message_id: &str) -> StoreResult<Option<PathBuf>> {
        let archive = self.layout.archive_dir().join(format!("{message_id}.json"));
        if archive.exists() {
            return Ok(Some(archive));
        }
        let outbox = self.layout.outbox_dir().join(format!("{message_id}.json"));
        if outbox.exists() {
            return Ok(Some(outbox));
        }
        let inbox_root = self.layout.inbox_root();
        if inbox_root.is_dir() {
            for entry in std::fs::read_dir(&inbox_root).map_err(|e| io_err(&inbox_root, e))? {
                let entry = entry.map_err(|e| io_err(&inbox_root, e))?;
                let candidate = entry.path().join(format!("{message_id}.json"));
                if candidate.exists() {
                    return Ok(Some(candidate));
                }
            }
        }
        Ok(None)
    }

    /// Stamp `ackedAt`/`ackedBy` on the message wherever it currently
    /// lives, rewriting that one file atomically.
    pub fn acknowledge(&self, message_id: &str, agent_id: &str) -> StoreResult<bool> {
        let Some(path) = self.find_message_path(message_id)? else {
            return Ok(false);
        };
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let mut message: Message = serde_json::from_str(&contents)?;
        message.acked_at = Some(chrono::Utc::now());
        message.acked_by = Some(agent_id.to_string());

        let tmp = path.with_extension("json.tmp");
        Self::write_message(&tmp, &message)?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        Ok(true)
    }

    pub fn get(&self, message_id: &str) -> StoreResult<Option<Message>> {
        let Some(path) = self.find_message_path(message_id)? else {
            return Ok(None);
        };
        Self::read_message_file(&path)
    }

    /// Every message currently in archive or outbox, for search indexing
    /// and the unacknowledged-messages query.
    pub fn all_persisted(&self) -> StoreResult<Vec<Message>> {
        let mut all = Vec::new();
        for dir in [self.layout.archive_dir(), self.layout.outbox_dir()] {
            if !dir.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))? {
                let entry = entry.map_err(|e| io_err(&dir, e))?;
                if !is_message_file(&entry.path()) {
                    continue;
                }
                if let Some(m) = Self::read_message_file(&entry.path())? {
                    all.push(m);
                }
            }
        }
        Ok(all)
    }

    pub fn get_unacknowledged(&self) -> StoreResult<Vec<Message>> {
        Ok(self
            .all_persisted()?
            .into_iter()
            .filter(|m| m.requires_ack() && !m.is_acked())
            .collect())
    }

    /// Prune archive+outbox entries older than `cutoff`.
    pub fn delete_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> StoreResult<usize> {
        let mut removed = 0;
        for dir in [self.layout.archive_dir(), self.layout.outbox_dir()] {
            if !dir.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))? {
                let entry = entry.map_err(|e| io_err(&dir, e))?;
                if !is_message_file(&entry.path()) {
                    continue;
                }
                if let Some(m) = Self::read_message_file(&entry.path())? {
                    if m.timestamp < cutoff {
                        std::fs::remove_file(entry.path()).map_err(|e| io_err(&entry.path(), e))?;
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }
}

fn is_message_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
        && !path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("malformed-"))
}
