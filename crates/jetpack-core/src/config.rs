//! Layered configuration (§6 "Configuration", §9 ambient stack).
//!
//! Resolution order for every tunable: CLI flag > environment variable >
//! `settings.json` in the work directory > compiled-in default. Config is
//! resolved once at process start into a plain [`Settings`] struct;
//! components never re-read the environment themselves.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeMode {
    Infinite,
    IdlePause,
    ObjectiveBased,
    IterationLimit,
}

impl Default for RuntimeMode {
    fn default() -> Self {
        Self::Infinite
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    pub mode: RuntimeMode,
    pub max_iterations: Option<u32>,
    pub idle_timeout_ms: Option<u64>,
    pub objective: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    pub work_polling_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub timeout_multiplier: f64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub graceful_shutdown_ms: u64,
    pub max_retries: u32,
    pub kill_grace_ms: u64,
    pub lease_duration_ms: i64,
    pub lease_sweep_interval_ms: u64,
    pub heartbeat_stale_threshold_ms: i64,
    /// Extra time added on top of the per-task timeout when leasing the
    /// task's files, so a lease never expires out from under a still-running
    /// execution (§4.6 step 5, "taskTimeoutMs + buffer").
    pub lease_acquire_buffer_ms: i64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            work_polling_interval_ms: 30_000,
            heartbeat_interval_ms: 30_000,
            timeout_multiplier: 2.0,
            min_timeout_ms: 5 * 60_000,
            max_timeout_ms: 2 * 60 * 60_000,
            graceful_shutdown_ms: 30_000,
            max_retries: 3,
            kill_grace_ms: 5_000,
            lease_duration_ms: 60_000,
            lease_sweep_interval_ms: 60_000,
            heartbeat_stale_threshold_ms: 90_000,
            lease_acquire_buffer_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPreset {
    pub name: String,
    pub skills: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub runtime: RuntimeSettings,
    pub agents: AgentSettings,
    pub default_count: u32,
    pub presets: Vec<AgentPreset>,
    /// Arbitrary extra keys present in `settings.json` but not modeled
    /// above; preserved so a round trip through `save` does not drop them.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            runtime: RuntimeSettings::default(),
            agents: AgentSettings::default(),
            default_count: 1,
            presets: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl AgentSettings {
    pub fn work_polling_interval(&self) -> Duration {
        Duration::from_millis(self.work_polling_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn graceful_shutdown(&self) -> Duration {
        Duration::from_millis(self.graceful_shutdown_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn lease_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.lease_sweep_interval_ms)
    }

    pub fn lease_acquire_buffer(&self) -> Duration {
        Duration::from_millis(self.lease_acquire_buffer_ms.max(0) as u64)
    }

    /// `max(minTimeoutMs, min(maxTimeoutMs, estimatedMinutes * multiplier * 60_000))` (§4.6 step 7).
    pub fn task_timeout(&self, estimated_minutes: u32) -> Duration {
        let scaled = (estimated_minutes as f64) * self.timeout_multiplier * 60_000.0;
        let bounded = scaled.clamp(self.min_timeout_ms as f64, self.max_timeout_ms as f64);
        Duration::from_millis(bounded as u64)
    }
}

/// One environment-variable override applied on top of a file/default
/// value, parsed with `f`. Malformed values are ignored in favor of the
/// lower-priority layer rather than failing startup.
fn env_override<T>(key: &str, current: T, f: impl Fn(&str) -> Option<T>) -> T {
    match std::env::var(key) {
        Ok(raw) => f(&raw).unwrap_or(current),
        Err(_) => current,
    }
}

impl Settings {
    /// Load `settings.json` from `work_dir` if present, then apply
    /// `JETPACK_*` environment overrides. CLI flags are layered on by the
    /// caller (the bootstrap binary) after this returns, since this crate
    /// does not itself parse argv.
    pub fn load(work_dir: &Path) -> CoreResult<Self> {
        let path = jetpack_store::Layout::new(work_dir).settings_file();
        let mut settings = match std::fs::read_to_string(&path) {
            Ok(contents) if !contents.trim().is_empty() => serde_json::from_str(&contents)
                .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?,
            _ => Settings::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        self.agents.work_polling_interval_ms = env_override(
            "JETPACK_WORK_POLLING_INTERVAL_MS",
            self.agents.work_polling_interval_ms,
            |s| s.parse().ok(),
        );
        self.agents.timeout_multiplier = env_override(
            "JETPACK_TIMEOUT_MULTIPLIER",
            self.agents.timeout_multiplier,
            |s| s.parse().ok(),
        );
        self.agents.min_timeout_ms =
            env_override("JETPACK_MIN_TIMEOUT_MS", self.agents.min_timeout_ms, |s| s.parse().ok());
        self.agents.max_timeout_ms =
            env_override("JETPACK_MAX_TIMEOUT_MS", self.agents.max_timeout_ms, |s| s.parse().ok());
        self.agents.graceful_shutdown_ms = env_override(
            "JETPACK_GRACEFUL_SHUTDOWN_MS",
            self.agents.graceful_shutdown_ms,
            |s| s.parse().ok(),
        );
        self.default_count =
            env_override("JETPACK_DEFAULT_COUNT", self.default_count, |s| s.parse().ok());
    }

    pub fn save(&self, work_dir: &Path) -> CoreResult<()> {
        let path = jetpack_store::Layout::new(work_dir).settings_file();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::Config(format!("{}: {e}", parent.display())))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CoreError::Config(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_documented_defaults() {
        let s = Settings::default();
        assert_eq!(s.agents.work_polling_interval_ms, 30_000);
        assert_eq!(s.agents.min_timeout_ms, 5 * 60_000);
        assert_eq!(s.agents.max_timeout_ms, 2 * 60 * 60_000);
        assert_eq!(s.default_count, 1);
    }

    #[test]
    fn task_timeout_respects_bounds() {
        let agents = AgentSettings::default();
        assert_eq!(agents.task_timeout(0), Duration::from_millis(agents.min_timeout_ms));
        assert_eq!(agents.task_timeout(10_000), Duration::from_millis(agents.max_timeout_ms));
        assert_eq!(agents.task_timeout(30), Duration::from_secs(30 * 2 * 60));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.default_count, 1);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut s = Settings::default();
        s.default_count = 4;
        s.presets.push(AgentPreset { name: "rust-dev".into(), skills: vec!["rust".into()] });
        s.save(tmp.path()).unwrap();

        let loaded = Settings::load(tmp.path()).unwrap();
        assert_eq!(loaded.default_count, 4);
        assert_eq!(loaded.presets[0].name, "rust-dev");
    }
}
