//! In-process mock adapter for tests (§4.5 "Known variants: ... Mock (for
//! tests)"). Never spawns a subprocess; returns a scripted result, or a
//! deterministic default success, for every `execute` call.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::trait_def::ModelAdapter;
use super::types::{ExecuteRequest, ExecuteResult, OutputCallback, ProgressCallback};

type Script = Arc<Mutex<Vec<ExecuteResult>>>;

pub struct MockAdapter {
    available: bool,
    script: Script,
    calls: AtomicUsize,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self { available: true, script: Arc::new(Mutex::new(Vec::new())), calls: AtomicUsize::new(0) }
    }
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self { available: false, ..Self::default() }
    }

    /// Queue results to return in order, one per `execute` call. Once
    /// exhausted, falls back to a default success.
    pub async fn push_result(&self, result: ExecuteResult) {
        self.script.lock().await.push(result);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn default_success() -> ExecuteResult {
        ExecuteResult {
            success: true,
            output: "mock execution complete".to_string(),
            files_created: vec![],
            files_modified: vec![],
            files_deleted: vec![],
            learnings: None,
            duration_ms: 1,
            token_usage: None,
            error: None,
            recoverable: false,
        }
    }
}

#[async_trait]
impl ModelAdapter for MockAdapter {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn execute(
        &self,
        _request: &ExecuteRequest,
        _cancel: CancellationToken,
        on_progress: Option<ProgressCallback>,
        on_output: Option<OutputCallback>,
    ) -> ExecuteResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.script.lock().await;
        let result = if queue.is_empty() { Self::default_success() } else { queue.remove(0) };
        if let Some(cb) = &on_progress {
            cb(&result.output);
        }
        if let Some(cb) = &on_output {
            cb(&result.output);
        }
        result
    }

    async fn close(&self) {}
}
