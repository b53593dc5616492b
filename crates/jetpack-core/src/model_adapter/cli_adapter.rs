//! Generic subprocess-backed `ModelAdapter`. Concrete variants (Claude
//! Code, Codex, Gemini) differ only in binary name, argument formation,
//! credential env var, and whether the prompt is a positional argument or
//! piped to stdin (§9 "Polymorphic adapters") -- everything else lives
//! here once.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::base::{classify_outcome, parse_file_operations, terminate_then_kill, validate_cli_path};
use super::trait_def::ModelAdapter;
use super::types::{ExecuteRequest, ExecuteResult, OutputCallback, ProgressCallback};

/// How the prompt reaches the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// The fully rendered prompt is the last positional argument.
    Positional,
    /// The prompt is written to stdin and the pipe is then closed.
    Stdin,
}

/// Everything that distinguishes one CLI-backed adapter from another.
pub struct CliAdapterConfig {
    pub provider: &'static str,
    pub model: &'static str,
    pub binary_path: String,
    pub credential_env_var: &'static str,
    pub prompt_mode: PromptMode,
    /// Extra flags inserted before the prompt, e.g. `["-p", "--output-format", "text"]`.
    pub base_args: Vec<String>,
    pub version_flag: &'static str,
    pub version_timeout: Duration,
    pub kill_grace: Duration,
}

pub struct CliAdapter {
    config: CliAdapterConfig,
}

impl CliAdapter {
    pub fn new(config: CliAdapterConfig) -> Self {
        Self { config }
    }

    fn render_prompt(request: &ExecuteRequest) -> String {
        let mut prompt = format!("{}\n\n{}", request.system_prompt, request.description);
        for message in &request.messages {
            prompt.push_str(&format!("\n\n[{}]: {}", message.role, message.content));
        }
        if !request.files.is_empty() {
            prompt.push_str(&format!("\n\nFiles in scope: {}", request.files.join(", ")));
        }
        prompt
    }

    fn build_command(&self, request: &ExecuteRequest, prompt: &str) -> CoreCommandResult {
        validate_cli_path(&self.config.binary_path)?;

        let mut command = Command::new(&self.config.binary_path);
        command
            .args(&self.config.base_args)
            .current_dir(&request.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if self.config.prompt_mode == PromptMode::Positional {
            command.arg(prompt);
        }

        let mut env: HashMap<String, String> = std::env::vars().collect();
        if let Ok(cred) = std::env::var(self.config.credential_env_var) {
            env.insert(self.config.credential_env_var.to_string(), cred);
        }
        command.envs(env);

        Ok(command)
    }
}

type CoreCommandResult = Result<Command, crate::error::CoreError>;

enum WaitOutcome {
    TimedOut(Duration),
    Io(std::io::Error),
}

impl CliAdapter {
    async fn wait_with_timeout(
        child: &mut tokio::process::Child,
        timeout: Option<Duration>,
    ) -> Result<std::process::ExitStatus, WaitOutcome> {
        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) => Ok(status),
                Ok(Err(err)) => Err(WaitOutcome::Io(err)),
                Err(_) => Err(WaitOutcome::TimedOut(timeout)),
            },
            None => child.wait().await.map_err(WaitOutcome::Io),
        }
    }
}

#[async_trait]
impl ModelAdapter for CliAdapter {
    fn provider(&self) -> &str {
        self.config.provider
    }

    fn model(&self) -> &str {
        self.config.model
    }

    async fn is_available(&self) -> bool {
        if validate_cli_path(&self.config.binary_path).is_err() {
            return false;
        }
        let mut command = Command::new(&self.config.binary_path);
        command.arg(self.config.version_flag).stdout(Stdio::null()).stderr(Stdio::null());

        match tokio::time::timeout(self.config.version_timeout, command.status()).await {
            Ok(Ok(status)) => status.success(),
            _ => false,
        }
    }

    async fn execute(
        &self,
        request: &ExecuteRequest,
        cancel: CancellationToken,
        on_progress: Option<ProgressCallback>,
        on_output: Option<OutputCallback>,
    ) -> ExecuteResult {
        let started = Instant::now();
        let prompt = Self::render_prompt(request);

        let mut command = match self.build_command(request, &prompt) {
            Ok(c) => c,
            Err(err) => return ExecuteResult::failure(err.to_string(), false, 0),
        };

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(err) => {
                return ExecuteResult::failure(
                    format!("failed to spawn {}: {err}", self.config.binary_path),
                    false,
                    started.elapsed().as_millis() as u64,
                );
            }
        };

        if self.config.prompt_mode == PromptMode::Stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(prompt.as_bytes()).await;
                drop(stdin);
            }
        } else {
            drop(child.stdin.take());
        }

        // Drain stdout/stderr on their own tasks so a child that fills one
        // pipe's buffer while we'd otherwise be blocked on the other can't
        // wedge the timeout/cancellation race below; killing the child
        // (on timeout or cancel) closes its pipes and these tasks simply
        // see EOF.
        let stdout_pipe = child.stdout.take();
        let stdout_task = tokio::spawn(async move {
            let mut acc = String::new();
            if let Some(stdout) = stdout_pipe {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if let Some(cb) = &on_output {
                        cb(&line);
                    }
                    if let Some(cb) = &on_progress {
                        cb(&line);
                    }
                    acc.push_str(&line);
                    acc.push('\n');
                }
            }
            acc
        });

        let stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut acc = String::new();
            if let Some(mut stderr) = stderr_pipe {
                let _ = stderr.read_to_string(&mut acc).await;
            }
            acc
        });

        let wait_result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                terminate_then_kill(&mut child, self.config.kill_grace).await;
                let stdout_acc = stdout_task.await.unwrap_or_default();
                let _ = stderr_task.await;
                return ExecuteResult {
                    success: false,
                    output: stdout_acc,
                    files_created: vec![],
                    files_modified: vec![],
                    files_deleted: vec![],
                    learnings: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                    token_usage: None,
                    error: Some("execution cancelled".to_string()),
                    recoverable: true,
                };
            }
            result = Self::wait_with_timeout(&mut child, request.timeout) => result,
        };
        let wait_result = match wait_result {
            Ok(status) => Ok(status),
            Err(WaitOutcome::TimedOut(timeout)) => {
                terminate_then_kill(&mut child, self.config.kill_grace).await;
                let stdout_acc = stdout_task.await.unwrap_or_default();
                let _ = stderr_task.await;
                return ExecuteResult {
                    success: false,
                    output: stdout_acc,
                    files_created: vec![],
                    files_modified: vec![],
                    files_deleted: vec![],
                    learnings: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                    token_usage: None,
                    error: Some(format!("task timed out after {timeout:?}")),
                    recoverable: true,
                };
            }
            Err(WaitOutcome::Io(err)) => Err(err),
        };

        let stdout_acc = stdout_task.await.unwrap_or_default();
        let stderr_acc = stderr_task.await.unwrap_or_default();
        let duration_ms = started.elapsed().as_millis() as u64;
        let status = match wait_result {
            Ok(status) => status,
            Err(err) => return ExecuteResult::failure(err.to_string(), true, duration_ms),
        };

        let success = classify_outcome(status.success(), &stderr_acc);
        let (files_created, files_modified, files_deleted) = parse_file_operations(&stdout_acc);

        if success {
            ExecuteResult {
                success: true,
                output: stdout_acc,
                files_created,
                files_modified,
                files_deleted,
                learnings: None,
                duration_ms,
                token_usage: None,
                error: None,
                recoverable: false,
            }
        } else {
            let error = if stderr_acc.trim().is_empty() {
                format!("exit code {:?}", status.code())
            } else {
                stderr_acc.trim().to_string()
            };
            ExecuteResult {
                success: false,
                output: stdout_acc,
                files_created,
                files_modified,
                files_deleted,
                learnings: None,
                duration_ms,
                token_usage: None,
                error: Some(error),
                recoverable: false,
            }
        }
    }

    async fn close(&self) {}
}
