//! Core-level error types layered over [`jetpack_store::StoreError`].
//!
//! Contention (lost claim race, lease held) is never modeled as an error
//! anywhere in this crate -- see the governing error taxonomy -- it is
//! always an `Ok` variant of a dedicated outcome enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] jetpack_store::StoreError),

    #[error(transparent)]
    Task(#[from] jetpack_store::TaskError),

    #[error("harness {0:?} is already running")]
    AlreadyRunning(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown model adapter provider {0:?}")]
    UnknownProvider(String),

    #[error("adapter CLI path rejected as unsafe: {0:?}")]
    UnsafeCliPath(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
