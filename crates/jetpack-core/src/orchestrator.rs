//! `Orchestrator`: the process-level owner of one work directory's harness
//! fleet, its shared tables, and its lease sweeper (§2 "Dependency order:
//! DataStore ← {TaskStore, LeaseManager, MessageBus} ← AgentHarness
//! (consumes ModelAdapter) ← Orchestrator").

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;

use jetpack_store::models::{Plan, Task, TaskStatus};
use jetpack_store::{AgentTable, Layout, LeaseTable, MessageStore, PlanStore, TaskTable};

use crate::agent_harness::{AgentEvent, AgentHarness, AgentHarnessConfig};
use crate::config::{RuntimeMode, Settings};
use crate::error::CoreResult;
use crate::lease_manager::LeaseManager;
use crate::message_bus::SharedMessageBus;
use crate::model_adapter::registry;
use crate::plan;

/// Fallback used by idle-pause mode when `runtime.idleTimeoutMs` is unset.
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 5 * 60_000;
/// Fallback used by iteration-limit mode when `runtime.maxIterations` is unset.
const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// An [`AgentEvent`] tagged with the harness that emitted it.
#[derive(Debug, Clone)]
pub struct OrchestratorEvent {
    pub agent_id: String,
    pub event: AgentEvent,
}

pub struct Orchestrator {
    work_dir: PathBuf,
    tasks: Arc<Mutex<TaskTable>>,
    agents_table: Arc<Mutex<AgentTable>>,
    plans: Arc<Mutex<PlanStore>>,
    leases: LeaseManager,
    messages: SharedMessageBus,
    settings: Settings,
    provider: String,
    binary_path: Option<String>,
    harnesses: Mutex<Vec<Arc<AgentHarness>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<OrchestratorEvent>,
    /// Fired by the runtime-mode watchdog when `settings.runtime.mode`
    /// decides the main loop should stop on its own, independent of an
    /// operator's Ctrl-C (§6 "runtime.mode ... when the orchestrator stops
    /// the main loop").
    shutdown: Arc<Notify>,
}

impl Orchestrator {
    /// Open the on-disk layout rooted at `work_dir` and build every shared
    /// table. `provider`/`binary_path` select the [`ModelAdapter`](crate::ModelAdapter)
    /// every harness in this process uses.
    pub fn open(
        work_dir: impl Into<PathBuf>,
        settings: Settings,
        provider: impl Into<String>,
        binary_path: Option<String>,
    ) -> CoreResult<Self> {
        let work_dir = work_dir.into();
        let layout = Layout::new(&work_dir);
        layout.ensure_dirs().map_err(|e| jetpack_store::StoreError::Io { path: layout.root().to_path_buf(), source: e })?;

        let tasks = Arc::new(Mutex::new(TaskTable::open(layout.tasks_jsonl())?));
        let agents_table = Arc::new(Mutex::new(AgentTable::open(layout.agents_file())?));
        let leases = LeaseManager::new(LeaseTable::open(layout.leases_file())?);
        let messages = SharedMessageBus::new(MessageStore::new(layout.clone())?);
        let plans = Arc::new(Mutex::new(PlanStore::new(layout)?));
        let (events, _) = broadcast::channel(1024);

        Ok(Self {
            work_dir,
            tasks,
            agents_table,
            plans,
            leases,
            messages,
            settings,
            provider: provider.into(),
            binary_path,
            harnesses: Mutex::new(Vec::new()),
            sweeper: Mutex::new(None),
            forwarders: Mutex::new(Vec::new()),
            watchdog: Mutex::new(None),
            events,
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn events(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Resolves once the runtime-mode watchdog decides the main loop should
    /// stop on its own. Callers race this against their own shutdown signal
    /// (e.g. Ctrl-C) and call [`Orchestrator::stop`] either way. Never
    /// resolves under `runtime.mode = infinite`, the default.
    pub async fn wait_for_runtime_shutdown(&self) {
        self.shutdown.notified().await
    }

    /// Start the lease sweeper and one harness per configured preset (or
    /// `settings.defaultCount` unskilled harnesses if no presets are
    /// configured).
    pub async fn start(self: &Arc<Self>) -> CoreResult<()> {
        {
            let mut sweeper = self.sweeper.lock().await;
            if sweeper.is_none() {
                *sweeper = Some(self.leases.spawn_sweeper(self.settings.agents.lease_sweep_interval()));
            }
        }

        let adapter = registry::build(&self.provider, self.binary_path.clone())?;

        let descriptors: Vec<(String, String, std::collections::BTreeSet<String>)> = if self.settings.presets.is_empty() {
            (0..self.settings.default_count.max(1))
                .map(|i| (format!("agent-{i}"), format!("agent-{i}"), std::collections::BTreeSet::new()))
                .collect()
        } else {
            self.settings
                .presets
                .iter()
                .enumerate()
                .map(|(i, preset)| {
                    (format!("{}-{i}", preset.name), preset.name.clone(), preset.skills.iter().cloned().collect())
                })
                .collect()
        };

        for (id, name, skills) in descriptors {
            let harness = Arc::new(AgentHarness::new(
                AgentHarnessConfig {
                    id: id.clone(),
                    name,
                    agent_type: self.provider.clone(),
                    skills,
                    system_prompt: default_system_prompt(),
                },
                self.tasks.clone(),
                self.agents_table.clone(),
                self.leases.clone(),
                self.messages.clone(),
                adapter.clone(),
                self.settings.agents.clone(),
                self.work_dir.clone(),
            ));
            harness.start().await?;
            self.forward_events(harness.clone());
            self.harnesses.lock().await.push(harness);
        }

        self.spawn_watchdog();
        Ok(())
    }

    /// Spawn the background task that enforces `settings.runtime.mode`, if
    /// that mode is anything other than the default `infinite`.
    fn spawn_watchdog(self: &Arc<Self>) {
        let mode = self.settings.runtime.mode;
        if matches!(mode, RuntimeMode::Infinite) {
            return;
        }

        let orchestrator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            match mode {
                RuntimeMode::Infinite => unreachable!(),
                RuntimeMode::IdlePause => orchestrator.watch_idle_pause().await,
                RuntimeMode::ObjectiveBased => orchestrator.watch_objective_based().await,
                RuntimeMode::IterationLimit => orchestrator.watch_iteration_limit().await,
            }
        });
        if let Ok(mut watchdog) = self.watchdog.try_lock() {
            *watchdog = Some(handle);
        }
    }

    /// Stops the fleet once every agent has been idle, with no ready work
    /// waiting, for `runtime.idleTimeoutMs` continuously.
    async fn watch_idle_pause(&self) {
        let timeout_ms = self.settings.runtime.idle_timeout_ms.unwrap_or(DEFAULT_IDLE_TIMEOUT_MS);
        let mut interval = tokio::time::interval(self.settings.agents.work_polling_interval());
        let mut idle_since: Option<Instant> = None;

        loop {
            interval.tick().await;
            let quiescent = self.is_quiescent().await;
            if quiescent {
                let since = idle_since.get_or_insert_with(Instant::now);
                if since.elapsed().as_millis() as u64 >= timeout_ms {
                    self.shutdown.notify_one();
                    return;
                }
            } else {
                idle_since = None;
            }
        }
    }

    /// Full natural-language objective evaluation belongs to the
    /// higher-level supervisor planner, which this crate doesn't carry; the
    /// bootstrap approximation is "objective satisfied once no task is left
    /// in a runnable or retryable state".
    async fn watch_objective_based(&self) {
        let mut interval = tokio::time::interval(self.settings.agents.work_polling_interval());
        loop {
            interval.tick().await;
            if self.is_quiescent().await {
                self.shutdown.notify_one();
                return;
            }
        }
    }

    /// Stops the fleet once `runtime.maxIterations` tasks have reached a
    /// terminal outcome (completed or failed).
    async fn watch_iteration_limit(&self) {
        let max_iterations = self.settings.runtime.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        let mut rx = self.events();
        let mut iterations: u32 = 0;
        while let Ok(event) = rx.recv().await {
            if matches!(event.event, AgentEvent::TaskCompleted { .. } | AgentEvent::TaskFailed { .. }) {
                iterations += 1;
                if iterations >= max_iterations {
                    self.shutdown.notify_one();
                    return;
                }
            }
        }
    }

    /// No task left pending, ready, claimed, or waiting on retry, and no
    /// harness mid-execution.
    async fn is_quiescent(&self) -> bool {
        let tasks = self.tasks.lock().await;
        !tasks.list().iter().any(|t| {
            matches!(
                t.status,
                TaskStatus::Pending
                    | TaskStatus::Ready
                    | TaskStatus::Claimed
                    | TaskStatus::InProgress
                    | TaskStatus::PendingRetry
            )
        })
    }

    fn forward_events(self: &Arc<Self>, harness: Arc<AgentHarness>) {
        let orchestrator = Arc::clone(self);
        let agent_id = harness.id().to_string();
        let mut rx = harness.events();
        let handle = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                let _ = orchestrator.events.send(OrchestratorEvent { agent_id: agent_id.clone(), event });
            }
        });
        if let Ok(mut forwarders) = self.forwarders.try_lock() {
            forwarders.push(handle);
        }
    }

    /// Stop every harness, then the lease sweeper.
    pub async fn stop(&self) -> CoreResult<()> {
        let harnesses = self.harnesses.lock().await;
        for harness in harnesses.iter() {
            harness.stop().await?;
        }
        drop(harnesses);

        let mut sweeper = self.sweeper.lock().await;
        if let Some(handle) = sweeper.take() {
            handle.abort();
        }
        let mut forwarders = self.forwarders.lock().await;
        for handle in forwarders.drain(..) {
            handle.abort();
        }
        let mut watchdog = self.watchdog.lock().await;
        if let Some(handle) = watchdog.take() {
            handle.abort();
        }
        Ok(())
    }

    /// Validate `plan` (cycle/unknown-dependency check), persist it, and
    /// materialize its items into tasks.
    pub async fn ingest_plan(&self, plan: Plan) -> CoreResult<Vec<Task>> {
        let materialized = plan::materialize(&plan)?;

        let mut plans = self.plans.lock().await;
        plans.save(&plan)?;
        drop(plans);

        let mut tasks = self.tasks.lock().await;
        for task in &materialized {
            tasks.create(task.clone())?;
        }
        Ok(materialized)
    }
}

fn default_system_prompt() -> String {
    "You are an autonomous coding agent completing one task at a time. \
     Report exactly what you created, modified, or deleted."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentPreset;
    use jetpack_store::models::{PlanItem, PlanItemStatus, PlanStatus, Priority};

    #[tokio::test]
    async fn start_spawns_one_harness_per_preset_and_stop_tears_down() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.presets =
            vec![AgentPreset { name: "rust".into(), skills: vec!["rust".into()] }];

        let orchestrator =
            Arc::new(Orchestrator::open(tmp.path(), settings, "mock", None).unwrap());
        orchestrator.start().await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(orchestrator.harnesses.lock().await.len(), 1);

        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn ingest_plan_persists_tasks_and_the_plan_document() {
        let tmp = tempfile::TempDir::new().unwrap();
        let orchestrator =
            Arc::new(Orchestrator::open(tmp.path(), Settings::default(), "mock", None).unwrap());

        let plan = Plan {
            id: "plan-1".into(),
            title: "Ship".into(),
            status: PlanStatus::Approved,
            items: vec![PlanItem {
                id: "item-1".into(),
                title: "do the thing".into(),
                status: PlanItemStatus::Pending,
                priority: Priority::Medium,
                skills: vec![],
                dependencies: vec![],
                estimated_minutes: Some(10),
                description: None,
            }],
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let tasks = orchestrator.ingest_plan(plan).await.unwrap();
        assert_eq!(tasks.len(), 1);

        let stored = orchestrator.tasks.lock().await;
        assert!(stored.get(&tasks[0].id).is_some());
    }

    #[tokio::test]
    async fn ingest_plan_rejects_a_cyclic_plan_without_persisting_tasks() {
        let tmp = tempfile::TempDir::new().unwrap();
        let orchestrator =
            Arc::new(Orchestrator::open(tmp.path(), Settings::default(), "mock", None).unwrap());

        let plan = Plan {
            id: "plan-2".into(),
            title: "Cyclic".into(),
            status: PlanStatus::Draft,
            items: vec![
                PlanItem {
                    id: "a".into(),
                    title: "a".into(),
                    status: PlanItemStatus::Pending,
                    priority: Priority::Medium,
                    skills: vec![],
                    dependencies: vec!["b".into()],
                    estimated_minutes: None,
                    description: None,
                },
                PlanItem {
                    id: "b".into(),
                    title: "b".into(),
                    status: PlanItemStatus::Pending,
                    priority: Priority::Medium,
                    skills: vec![],
                    dependencies: vec!["a".into()],
                    estimated_minutes: None,
                    description: None,
                },
            ],
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        assert!(orchestrator.ingest_plan(plan).await.is_err());
        let stored = orchestrator.tasks.lock().await;
        assert!(stored.list().is_empty());
    }

    #[tokio::test]
    async fn idle_pause_mode_stops_the_main_loop_once_the_fleet_goes_quiet() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.runtime.mode = RuntimeMode::IdlePause;
        settings.runtime.idle_timeout_ms = Some(20);
        settings.agents.work_polling_interval_ms = 5;

        let orchestrator =
            Arc::new(Orchestrator::open(tmp.path(), settings, "mock", None).unwrap());
        orchestrator.start().await.unwrap();

        let fired = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            orchestrator.wait_for_runtime_shutdown(),
        )
        .await;
        assert!(fired.is_ok(), "idle-pause watchdog should fire once no work is left");

        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn infinite_mode_never_fires_the_watchdog() {
        let tmp = tempfile::TempDir::new().unwrap();
        let orchestrator =
            Arc::new(Orchestrator::open(tmp.path(), Settings::default(), "mock", None).unwrap());
        orchestrator.start().await.unwrap();

        let fired = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            orchestrator.wait_for_runtime_shutdown(),
        )
        .await;
        assert!(fired.is_err(), "default runtime.mode must never stop the loop on its own");

        orchestrator.stop().await.unwrap();
    }
}
