//! Gemini CLI adapter: `gemini` reads the prompt from stdin, credentials
//! via `GEMINI_API_KEY`.

use std::time::Duration;

use super::cli_adapter::{CliAdapter, CliAdapterConfig, PromptMode};

pub fn new(binary_path: Option<String>) -> CliAdapter {
    CliAdapter::new(CliAdapterConfig {
        provider: "gemini",
        model: "gemini",
        binary_path: binary_path.unwrap_or_else(|| "gemini".to_string()),
        credential_env_var: "GEMINI_API_KEY",
        prompt_mode: PromptMode::Stdin,
        base_args: vec![],
        version_flag: "--version",
        version_timeout: Duration::from_secs(5),
        kill_grace: Duration::from_secs(5),
    })
}
