//! The stable on-disk layout (§6): external processes depend on these paths
//! literally, so they are centralized here rather than assembled ad hoc.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: work_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks_jsonl(&self) -> PathBuf {
        self.root.join(".beads").join("tasks.jsonl")
    }

    pub fn jetpack_dir(&self) -> PathBuf {
        self.root.join(".jetpack")
    }

    pub fn plans_dir(&self) -> PathBuf {
        self.jetpack_dir().join("plans")
    }

    pub fn plan_file(&self, plan_id: &str) -> PathBuf {
        self.plans_dir().join(format!("{plan_id}.json"))
    }

    pub fn mail_dir(&self) -> PathBuf {
        self.jetpack_dir().join("mail")
    }

    pub fn inbox_dir(&self, agent_id: &str) -> PathBuf {
        self.mail_dir().join("inbox").join(agent_id)
    }

    pub fn inbox_root(&self) -> PathBuf {
        self.mail_dir().join("inbox")
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.mail_dir().join("outbox")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.mail_dir().join("archive")
    }

    pub fn leases_file(&self) -> PathBuf {
        self.mail_dir().join("leases.json")
    }

    pub fn agents_file(&self) -> PathBuf {
        self.jetpack_dir().join("agents.json")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.jetpack_dir().join("settings.json")
    }

    /// Create every directory the layout depends on existing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.tasks_jsonl().parent().unwrap().to_path_buf(),
            self.plans_dir(),
            self.inbox_root(),
            self.outbox_dir(),
            self.archive_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
