//! Shared request/result types for the [`super::ModelAdapter`] interface.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// One turn of prior conversation, threaded through to adapters that
/// support multi-turn resume.
#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
}

/// Everything an adapter needs to execute one task (§4.5 "execute contract").
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub files: Vec<String>,
    pub skills: BTreeSet<String>,
    pub working_dir: PathBuf,
    pub system_prompt: String,
    pub messages: Vec<ConversationMessage>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// `{success, output, filesCreated, filesModified, filesDeleted, learnings?,
/// durationMs, tokenUsage?, error?}` (§4.5). `recoverable` classifies a
/// failure per §7/§9's open question -- only timeout is unambiguous, so
/// adapters default conservatively to non-recoverable otherwise and the
/// harness treats timeouts/transient I/O as recoverable.
#[derive(Debug, Clone)]
pub struct ExecuteResult {
    pub success: bool,
    pub output: String,
    pub files_created: Vec<String>,
    pub files_modified: Vec<String>,
    pub files_deleted: Vec<String>,
    pub learnings: Option<String>,
    pub duration_ms: u64,
    pub token_usage: Option<TokenUsage>,
    pub error: Option<String>,
    pub recoverable: bool,
}

impl ExecuteResult {
    pub fn failure(error: impl Into<String>, recoverable: bool, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: String::new(),
            files_created: vec![],
            files_modified: vec![],
            files_deleted: vec![],
            learnings: None,
            duration_ms,
            token_usage: None,
            error: Some(error.into()),
            recoverable,
        }
    }
}

pub type ProgressCallback = Box<dyn Fn(&str) + Send + Sync>;
pub type OutputCallback = Box<dyn Fn(&str) + Send + Sync>;
