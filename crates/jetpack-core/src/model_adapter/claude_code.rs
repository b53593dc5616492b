//! Claude Code CLI adapter: `claude -p <prompt>`, prompt as a positional
//! argument, credentials via `ANTHROPIC_API_KEY`.

use std::time::Duration;

use super::cli_adapter::{CliAdapter, CliAdapterConfig, PromptMode};

pub fn new(binary_path: Option<String>) -> CliAdapter {
    CliAdapter::new(CliAdapterConfig {
        provider: "claude-code",
        model: "claude",
        binary_path: binary_path.unwrap_or_else(|| "claude".to_string()),
        credential_env_var: "ANTHROPIC_API_KEY",
        prompt_mode: PromptMode::Positional,
        base_args: vec!["-p".to_string()],
        version_flag: "--version",
        version_timeout: Duration::from_secs(5),
        kill_grace: Duration::from_secs(5),
    })
}
