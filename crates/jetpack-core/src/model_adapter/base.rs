//! Helpers shared across adapter implementations: CLI-path validation,
//! timeout/kill handling, and the heuristic file-operation parser.
//! One "base" object per §9 ("Polymorphic adapters"): no inheritance depth
//! beyond one, implementations embed these free functions directly.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::process::Child;

use crate::error::{CoreError, CoreResult};

/// Shell metacharacters and command-substitution markers that make a
/// binary path unsafe to pass to a shell-less `Command::new` *if* it were
/// ever interpolated into a shell string; rejected outright regardless
/// (§4.5 "Validates the CLI binary path against shell-metacharacter
/// injection").
const UNSAFE_PATTERNS: &[&str] = &[";", "&", "|", "`", "$", "(", ")", "\n"];

pub fn validate_cli_path(path: &str) -> CoreResult<()> {
    if path.trim().is_empty() {
        return Err(CoreError::UnsafeCliPath(path.to_string()));
    }
    if UNSAFE_PATTERNS.iter().any(|p| path.contains(p)) {
        return Err(CoreError::UnsafeCliPath(path.to_string()));
    }
    Ok(())
}

/// SIGTERM, wait up to `grace`, SIGKILL if still alive (§4.5, §5
/// "Cancellation"). Never detaches the child.
pub async fn terminate_then_kill(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        send_signal(pid, Signal::Term);
    }
    let waited = tokio::time::timeout(grace, child.wait()).await;
    if waited.is_err() {
        if let Some(pid) = child.id() {
            send_signal(pid, Signal::Kill);
        }
        let _ = child.wait().await;
    }
}

enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) {
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    unsafe {
        libc::kill(pid as libc::pid_t, sig);
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: Signal) {}

/// Lossy, line-oriented heuristic parser for the agent's own prose report
/// of what it touched (§4.5: "parsed heuristically... hints, not
/// authoritative"). Scans for lines containing a verb keyword and a
/// quoted-path-like token, de-duplicating per category.
pub fn parse_file_operations(output: &str) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut created = BTreeSet::new();
    let mut modified = BTreeSet::new();
    let mut deleted = BTreeSet::new();

    for line in output.lines() {
        let lower = line.to_lowercase();
        let Some(path) = extract_path_token(line) else { continue };

        if contains_any(&lower, &["created", "wrote", "generated"]) {
            created.insert(path);
        } else if contains_any(&lower, &["modified", "updated", "changed"]) {
            modified.insert(path);
        } else if contains_any(&lower, &["deleted", "removed"]) {
            deleted.insert(path);
        }
    }

    (created.into_iter().collect(), modified.into_iter().collect(), deleted.into_iter().collect())
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Pull the first quoted or backtick-delimited path-like token out of a
/// line, e.g. `Created file "src/foo.ts"` or `` modified `src/foo.ts` ``.
fn extract_path_token(line: &str) -> Option<String> {
    for (open, close) in [('"', '"'), ('\'', '\''), ('`', '`')] {
        if let Some(start) = line.find(open) {
            if let Some(len) = line[start + 1..].find(close) {
                let candidate = &line[start + 1..start + 1 + len];
                if looks_like_path(candidate) {
                    return Some(candidate.to_string());
                }
            }
        }
    }
    None
}

fn looks_like_path(candidate: &str) -> bool {
    !candidate.is_empty() && !candidate.contains(' ') && candidate.contains('.')
}

/// Success criterion shared by every adapter variant (§4.5): exit 0 AND
/// stderr does not contain the substring "error" (case-insensitive).
pub fn classify_outcome(exit_success: bool, stderr: &str) -> bool {
    exit_success && !stderr.to_lowercase().contains("error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_paths_with_shell_metacharacters() {
        for bad in ["claude; rm -rf /", "claude && evil", "claude | cat", "claude`whoami`", "claude$(whoami)"] {
            assert!(validate_cli_path(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn accepts_plain_binary_names_and_paths() {
        assert!(validate_cli_path("claude").is_ok());
        assert!(validate_cli_path("/usr/local/bin/claude-code").is_ok());
    }

    #[test]
    fn rejects_empty_path() {
        assert!(validate_cli_path("").is_err());
    }

    #[test]
    fn parses_created_modified_deleted_lines() {
        let output = r#"
Created file "src/new.ts"
I modified `src/existing.ts` to add a helper
Deleted 'src/old.ts' since it was unused
Just some narration with no path
"#;
        let (created, modified, deleted) = parse_file_operations(output);
        assert_eq!(created, vec!["src/new.ts".to_string()]);
        assert_eq!(modified, vec!["src/existing.ts".to_string()]);
        assert_eq!(deleted, vec!["src/old.ts".to_string()]);
    }

    #[test]
    fn parse_dedupes_repeated_mentions() {
        let output = "Created file \"src/a.ts\"\nCreated file \"src/a.ts\" again";
        let (created, _, _) = parse_file_operations(output);
        assert_eq!(created, vec!["src/a.ts".to_string()]);
    }

    #[test]
    fn classify_outcome_requires_success_and_clean_stderr() {
        assert!(classify_outcome(true, ""));
        assert!(!classify_outcome(false, ""));
        assert!(!classify_outcome(true, "Error: something broke"));
        assert!(!classify_outcome(true, "ERROR"));
    }
}
