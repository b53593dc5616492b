//! Factory keyed by provider tag (§9 "Polymorphic adapters").

use std::sync::Arc;

use crate::error::{CoreError, CoreResult};

use super::trait_def::ModelAdapter;
use super::{claude_code, codex, gemini, mock};

/// Construct the adapter for `provider`, optionally overriding the binary
/// path (used by tests and non-standard installs).
pub fn build(provider: &str, binary_path: Option<String>) -> CoreResult<Arc<dyn ModelAdapter>> {
    match provider {
        "claude-code" => Ok(Arc::new(claude_code::new(binary_path))),
        "codex" => Ok(Arc::new(codex::new(binary_path))),
        "gemini" => Ok(Arc::new(gemini::new(binary_path))),
        "mock" => Ok(Arc::new(mock::MockAdapter::new())),
        other => Err(CoreError::UnknownProvider(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_every_known_provider() {
        for provider in ["claude-code", "codex", "gemini", "mock"] {
            let adapter = build(provider, None).unwrap();
            assert_eq!(adapter.provider(), provider);
        }
    }

    #[test]
    fn unknown_provider_errors() {
        assert!(build("nonexistent", None).is_err());
    }
}
