//! `jetpack-store`: the durable DataStore (§4.1).
//!
//! A serializable, durable key-value-plus-index store backed entirely by
//! files under a work directory -- no embedded relational engine. The
//! on-disk contract in `SPEC_FULL.md` §6 *is* the schema: tasks live in an
//! append-only JSONL log, agents and leases in small rewritten-wholesale
//! snapshots, messages as one file per inbox/outbox/archive entry, plans
//! as one file per plan. [`DataStore`] wires the four entity tables
//! together behind the single facade every other component depends on.

pub mod agents;
pub mod error;
pub mod jsonl;
pub mod leases;
pub mod mail;
pub mod models;
pub mod paths;
pub mod plans;
pub mod snapshot;
pub mod tasks;

pub use agents::AgentTable;
pub use error::{StoreError, StoreResult, TaskError, TaskResult};
pub use leases::{AcquireOutcome, LeaseTable};
pub use mail::{DeliveredMessage, MessageSource, MessageStore};
pub use paths::Layout;
pub use plans::PlanStore;
pub use tasks::{ClaimOutcome, TaskTable};

/// The single source of truth for one work directory: tasks, agents,
/// leases, messages and plans, each owned exclusively by this struct.
/// Components receive copies/views; every mutation goes through one of
/// the tables below.
pub struct DataStore {
    layout: Layout,
    pub tasks: TaskTable,
    pub agents: AgentTable,
    pub leases: LeaseTable,
    pub messages: MessageStore,
    pub plans: PlanStore,
}

impl DataStore {
    /// Open (creating if absent) the full on-disk layout rooted at
    /// `work_dir`.
    pub fn open(work_dir: impl Into<std::path::PathBuf>) -> StoreResult<Self> {
        let layout = Layout::new(work_dir);
        layout
            .ensure_dirs()
            .map_err(|e| StoreError::Io { path: layout.root().to_path_buf(), source: e })?;

        Ok(Self {
            tasks: TaskTable::open(layout.tasks_jsonl())?,
            agents: AgentTable::open(layout.agents_file())?,
            leases: LeaseTable::open(layout.leases_file())?,
            messages: MessageStore::new(layout.clone())?,
            plans: PlanStore::new(layout.clone())?,
            layout,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Pick up records appended to the task log by a peer process (the web
    /// dashboard, the CLI, the MCP server) since we last looked. Agents and
    /// leases already reload on every table-level call (§9 "each subsystem
    /// maintains its own processed cursor"); tasks use an explicit sync
    /// because callers iterate the in-memory index directly.
    pub fn sync(&mut self) -> StoreResult<bool> {
        self.tasks.sync()
    }
}
