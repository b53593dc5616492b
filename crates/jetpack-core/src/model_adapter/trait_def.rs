//! The `ModelAdapter` trait (§4.5): a polymorphic interface over external
//! coding-assistant CLIs. Object-safe so adapters can be stored as
//! `Arc<dyn ModelAdapter>` and selected at runtime by provider tag.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::types::{ExecuteRequest, ExecuteResult, OutputCallback, ProgressCallback};

#[async_trait]
pub trait ModelAdapter: Send + Sync {
    fn provider(&self) -> &str;
    fn model(&self) -> &str;

    /// Invokes the binary with `--version` under a short timeout (default
    /// 5s); true iff exit 0.
    async fn is_available(&self) -> bool;

    /// Execute exactly one task. Must not throw on child-process failure --
    /// always returns a populated [`ExecuteResult`] (§4.5). `cancel` is
    /// tied to harness shutdown (§9 "Subprocess lifetime"): a cancelled
    /// token aborts the subprocess with the same SIGTERM/SIGKILL sequence
    /// as a timeout, rather than detaching it.
    async fn execute(
        &self,
        request: &ExecuteRequest,
        cancel: CancellationToken,
        on_progress: Option<ProgressCallback>,
        on_output: Option<OutputCallback>,
    ) -> ExecuteResult;

    async fn close(&self);
}

const _: () = {
    fn _assert_object_safe(_: &dyn ModelAdapter) {}
};
