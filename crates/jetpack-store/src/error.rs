use std::path::PathBuf;

use thiserror::Error;

/// DataStore-level failures: I/O, (de)serialization, and on-disk corruption.
/// Contention (lost claim race, lease held) is never modeled here -- see
/// the `Ok` variants returned by `tasks::claim`/`leases::acquire`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize record: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt record in {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("no record found for id {id:?}")]
    NotFound { id: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Task-transition and plan-ingest failures -- all *input validation* per
/// the governing error taxonomy.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("no task with id {id:?}")]
    NotFound { id: String },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: crate::models::TaskStatus,
        to: crate::models::TaskStatus,
    },

    #[error("task {task_id:?} depends on unknown task {dep_id:?}")]
    UnknownDependency { task_id: String, dep_id: String },

    #[error("plan contains a dependency cycle among items: {item_ids:?}")]
    CyclicPlan { item_ids: Vec<String> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type TaskResult<T> = Result<T, TaskError>;
