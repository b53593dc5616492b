//! `AgentHarness` (§4.6): the work-claim loop run by one agent -- poll,
//! filter, claim, lease, execute, report, release.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use jetpack_store::models::{Agent, AgentStatus, Message, MessageType, TaskStatus};
use jetpack_store::tasks::ClaimOutcome;
use jetpack_store::{AgentTable, StoreError, TaskTable};

use crate::config::AgentSettings;
use crate::error::{CoreError, CoreResult};
use crate::lease_manager::LeaseManager;
use crate::message_bus::SharedMessageBus;
use crate::model_adapter::{ExecuteRequest, ExecuteResult, ModelAdapter};
use crate::task_store::get_ready_tasks;

/// The harness's own event stream (§4.6: "emits an event stream").
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Started,
    Stopped,
    TaskClaimed { task_id: String },
    TaskProgress { task_id: String, message: String },
    TaskCompleted { task_id: String },
    TaskFailed { task_id: String, reason: String },
    HeartbeatFailed { error: String },
    Error { message: String },
}

/// Identity and capability of the agent this harness drives. Fixed for the
/// life of the harness; skills are advertised once at `started` and consulted
/// on every `lookForWork` pass.
#[derive(Debug, Clone)]
pub struct AgentHarnessConfig {
    pub id: String,
    pub name: String,
    pub agent_type: String,
    pub skills: BTreeSet<String>,
    pub system_prompt: String,
}

/// One harness instance per agent. Construct with the shared tables it needs
/// and a [`ModelAdapter`], then `start()` it; `stop()` runs the graceful
/// shutdown sequence. Starting an instance twice is a programming error.
pub struct AgentHarness {
    config: AgentHarnessConfig,
    tasks: Arc<Mutex<TaskTable>>,
    agents: Arc<Mutex<AgentTable>>,
    leases: LeaseManager,
    messages: SharedMessageBus,
    adapter: Arc<dyn ModelAdapter>,
    settings: AgentSettings,
    work_dir: PathBuf,
    running: AtomicBool,
    cancel: CancellationToken,
    events: broadcast::Sender<AgentEvent>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl AgentHarness {
    pub fn new(
        config: AgentHarnessConfig,
        tasks: Arc<Mutex<TaskTable>>,
        agents: Arc<Mutex<AgentTable>>,
        leases: LeaseManager,
        messages: SharedMessageBus,
        adapter: Arc<dyn ModelAdapter>,
        settings: AgentSettings,
        work_dir: PathBuf,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            tasks,
            agents,
            leases,
            messages,
            adapter,
            settings,
            work_dir,
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            events,
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn events(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event);
    }

    /// Run the startup sequence (§4.6 "Startup", steps 1-5) and spawn the
    /// heartbeat and polling background tasks. Fails with
    /// [`CoreError::AlreadyRunning`] if called a second time on the same
    /// instance.
    pub async fn start(self: &Arc<Self>) -> CoreResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyRunning(self.config.id.clone()));
        }

        self.register().await?;
        let wake = self.subscribe_for_wakeup().await;
        self.announce_started().await?;
        self.emit(AgentEvent::Started);

        let mut background = self.background.lock().await;
        background.push(self.spawn_heartbeat_loop());
        background.push(self.spawn_poll_loop(wake));
        Ok(())
    }

    /// §4.6 "Shutdown (graceful)".
    pub async fn stop(&self) -> CoreResult<()> {
        self.cancel.cancel();

        let deadline = tokio::time::sleep(self.settings.graceful_shutdown());
        tokio::pin!(deadline);
        loop {
            let busy = {
                let agents = self.agents.lock().await;
                agents.get(&self.config.id).map(|a| a.status == AgentStatus::Busy).unwrap_or(false)
            };
            if !busy {
                break;
            }
            tokio::select! {
                _ = &mut deadline => break,
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }

        let mut background = self.background.lock().await;
        for handle in background.drain(..) {
            handle.abort();
        }
        drop(background);

        self.leases.release_all_for_agent(&self.config.id).await?;

        let stopped = SharedMessageBus::new_message(
            &self.config.id,
            None,
            MessageType::AgentStopped,
            serde_json::json!({}),
            None,
            false,
        );
        self.messages.publish(&stopped).await?;
        self.emit(AgentEvent::Stopped);

        let mut agents = self.agents.lock().await;
        agents.deregister(&self.config.id)?;
        Ok(())
    }

    async fn register(&self) -> CoreResult<()> {
        let mut agents = self.agents.lock().await;
        agents.register(Agent {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            agent_type: self.config.agent_type.clone(),
            skills: self.config.skills.clone(),
            status: AgentStatus::Idle,
            current_task_id: None,
            tasks_completed: 0,
            tasks_failed: 0,
            last_heartbeat_at: Utc::now(),
            created_at: Utc::now(),
        })?;
        Ok(())
    }

    /// Subscribe to the message types that should trigger an out-of-band
    /// `lookForWork` instead of waiting for the next poll tick, and return
    /// the `Notify` the subscription handlers signal.
    async fn subscribe_for_wakeup(&self) -> Arc<Notify> {
        let wake = Arc::new(Notify::new());
        for message_type in [MessageType::TaskCreated, MessageType::TaskUpdated] {
            let wake = wake.clone();
            self.messages
                .subscribe(
                    message_type,
                    Arc::new(move |_message: &Message| {
                        wake.notify_one();
                    }),
                )
                .await;
        }
        wake
    }

    async fn announce_started(&self) -> CoreResult<()> {
        let message = SharedMessageBus::new_message(
            &self.config.id,
            None,
            MessageType::AgentStarted,
            serde_json::json!({"skills": self.config.skills}),
            None,
            false,
        );
        self.messages.publish(&message).await?;
        Ok(())
    }

    fn spawn_heartbeat_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let harness = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(harness.settings.heartbeat_interval());
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = harness.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = harness.do_heartbeat().await {
                            tracing::warn!(agent = %harness.config.id, error = %err, "heartbeat failed");
                            harness.emit(AgentEvent::HeartbeatFailed { error: err.to_string() });
                        }
                    }
                }
            }
        })
    }

    async fn do_heartbeat(&self) -> CoreResult<()> {
        let status = {
            let mut agents = self.agents.lock().await;
            agents.heartbeat(&self.config.id)?;
            agents.get(&self.config.id).map(|a| a.status).unwrap_or(AgentStatus::Idle)
        };
        self.messages.send_heartbeat(&self.config.id, &status.to_string()).await?;
        Ok(())
    }

    fn spawn_poll_loop(self: &Arc<Self>, wake: Arc<Notify>) -> JoinHandle<()> {
        let harness = Arc::clone(self);
        tokio::spawn(async move {
            harness.try_look_for_work().await;
            let mut ticker = tokio::time::interval(harness.settings.work_polling_interval());
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = harness.cancel.cancelled() => break,
                    _ = ticker.tick() => harness.try_look_for_work().await,
                    _ = wake.notified() => harness.try_look_for_work().await,
                }
            }
        })
    }

    /// Drain the ready queue: run `lookForWork` repeatedly (with the
    /// cooldown from §4.6 step 11) until it finds nothing to claim, the
    /// agent is no longer idle, or shutdown is requested.
    async fn try_look_for_work(&self) {
        loop {
            let idle = {
                let agents = self.agents.lock().await;
                agents.get(&self.config.id).map(|a| a.status == AgentStatus::Idle).unwrap_or(false)
            };
            if !idle {
                return;
            }

            match self.look_for_work_once().await {
                Ok(true) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
                Ok(false) => return,
                Err(err) => {
                    tracing::warn!(agent = %self.config.id, error = %err, "lookForWork failed");
                    self.emit(AgentEvent::Error { message: err.to_string() });
                    return;
                }
            }
        }
    }

    /// One pass of `lookForWork` (§4.6 steps 1-11). Returns `Ok(true)` if a
    /// task was claimed and processed (caller should immediately try again),
    /// `Ok(false)` if there was nothing to do.
    async fn look_for_work_once(&self) -> CoreResult<bool> {
        let claimed = {
            let mut tasks = self.tasks.lock().await;
            let candidates: Vec<_> = get_ready_tasks(&mut tasks, self.settings.max_retries)?
                .into_iter()
                .filter(|t| t.required_skills.is_subset(&self.config.skills))
                .collect();

            let mut claimed = None;
            for candidate in candidates {
                if tasks.claim(&candidate.id, &self.config.id)? == ClaimOutcome::Claimed {
                    claimed = tasks.get(&candidate.id).cloned();
                    break;
                }
            }
            claimed
        };
        let Some(task) = claimed else { return Ok(false) };

        let timeout = self.settings.task_timeout(task.estimated_minutes);
        let lease_duration = timeout + self.settings.lease_acquire_buffer();

        if !task.files.is_empty() {
            let outcome =
                self.leases.acquire_all(&task.files, &self.config.id, lease_duration, Some(task.id.clone())).await?;
            if outcome.is_err() {
                self.fail_on_contention(&task.id).await?;
                return Ok(true);
            }
        }

        self.mark_claimed(&task.id).await?;

        let request = ExecuteRequest {
            task_id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            files: task.files.clone(),
            skills: task.required_skills.clone(),
            working_dir: self.work_dir.clone(),
            system_prompt: self.config.system_prompt.clone(),
            messages: Vec::new(),
            timeout: Some(timeout),
        };

        let progress_task_id = task.id.clone();
        let progress_events = self.events.clone();
        let on_progress = Box::new(move |chunk: &str| {
            let _ = progress_events
                .send(AgentEvent::TaskProgress { task_id: progress_task_id.clone(), message: chunk.to_string() });
        });
        let output_task_id = task.id.clone();
        let output_events = self.events.clone();
        let on_output = Box::new(move |chunk: &str| {
            let _ = output_events
                .send(AgentEvent::TaskProgress { task_id: output_task_id.clone(), message: chunk.to_string() });
        });

        let result =
            self.adapter.execute(&request, self.cancel.child_token(), Some(on_progress), Some(on_output)).await;

        self.report_result(&task.id, result).await?;
        self.leases.release_all_for_agent(&self.config.id).await?;

        let mut agents = self.agents.lock().await;
        agents.set_status(&self.config.id, AgentStatus::Idle)?;
        Ok(true)
    }

    async fn fail_on_contention(&self, task_id: &str) -> CoreResult<()> {
        {
            let mut tasks = self.tasks.lock().await;
            let mut task = tasks.get(task_id).cloned().ok_or_else(|| StoreError::NotFound { id: task_id.into() })?;
            task.status = TaskStatus::Failed;
            task.output = Some("file lease contention".to_string());
            task.updated_at = Utc::now();
            tasks.update(task)?;
        }
        let message = SharedMessageBus::new_message(
            &self.config.id,
            None,
            MessageType::TaskFailed,
            serde_json::json!({"taskId": task_id, "reason": "contention"}),
            None,
            false,
        );
        self.messages.publish(&message).await?;
        self.emit(AgentEvent::TaskFailed { task_id: task_id.to_string(), reason: "contention".to_string() });
        Ok(())
    }

    async fn mark_claimed(&self, task_id: &str) -> CoreResult<()> {
        {
            let mut agents = self.agents.lock().await;
            agents.set_status(&self.config.id, AgentStatus::Busy)?;
        }
        let message = SharedMessageBus::new_message(
            &self.config.id,
            None,
            MessageType::TaskClaimed,
            serde_json::json!({"taskId": task_id}),
            None,
            false,
        );
        self.messages.publish(&message).await?;
        self.emit(AgentEvent::TaskClaimed { task_id: task_id.to_string() });
        Ok(())
    }

    /// §4.6 step 9: success/recoverable/non-recoverable branching.
    async fn report_result(&self, task_id: &str, result: ExecuteResult) -> CoreResult<()> {
        let mut tasks = self.tasks.lock().await;
        let mut task = tasks.get(task_id).cloned().ok_or_else(|| StoreError::NotFound { id: task_id.into() })?;

        if result.success {
            task.status = TaskStatus::Completed;
            task.completed_at = Some(Utc::now());
            task.output = Some(result.output);
            task.actual_minutes = Some((result.duration_ms / 60_000) as u32);
            tasks.update(task)?;
            drop(tasks);

            let mut agents = self.agents.lock().await;
            agents.record_completion(&self.config.id, true)?;
            drop(agents);

            let message = SharedMessageBus::new_message(
                &self.config.id,
                None,
                MessageType::TaskCompleted,
                serde_json::json!({"taskId": task_id}),
                None,
                false,
            );
            self.messages.publish(&message).await?;
            self.emit(AgentEvent::TaskCompleted { task_id: task_id.to_string() });
        } else {
            if result.recoverable {
                task.retry_count += 1;
            }

            if result.recoverable && task.retry_count < self.settings.max_retries {
                task.status = TaskStatus::PendingRetry;
                task.output = result.error.clone();
                task.updated_at = Utc::now();
                tasks.update(task)?;
                drop(tasks);

                let message = SharedMessageBus::new_message(
                    &self.config.id,
                    None,
                    MessageType::TaskFailed,
                    serde_json::json!({"taskId": task_id, "recoverable": true}),
                    None,
                    false,
                );
                self.messages.publish(&message).await?;
                self.emit(AgentEvent::TaskFailed {
                    task_id: task_id.to_string(),
                    reason: result.error.unwrap_or_default(),
                });
            } else {
                task.status = TaskStatus::Failed;
                task.output = result.error.clone();
                task.updated_at = Utc::now();
                tasks.update(task)?;
                drop(tasks);

                let mut agents = self.agents.lock().await;
                agents.record_completion(&self.config.id, false)?;
                drop(agents);

                let message = SharedMessageBus::new_message(
                    &self.config.id,
                    None,
                    MessageType::TaskFailed,
                    serde_json::json!({"taskId": task_id, "recoverable": false}),
                    None,
                    false,
                );
                self.messages.publish(&message).await?;
                self.emit(AgentEvent::TaskFailed {
                    task_id: task_id.to_string(),
                    reason: result.error.unwrap_or_default(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jetpack_store::models::{Priority, Task};
    use jetpack_store::{AgentTable, Layout, LeaseTable, MessageStore, TaskTable};

    fn settings() -> AgentSettings {
        AgentSettings {
            work_polling_interval_ms: 20,
            heartbeat_interval_ms: 20,
            max_retries: 2,
            graceful_shutdown_ms: 200,
            ..AgentSettings::default()
        }
    }

    fn sample_task(id: &str, files: &[&str]) -> Task {
        Task {
            id: id.into(),
            title: "do it".into(),
            description: "d".into(),
            status: TaskStatus::Pending,
            priority: Priority::Medium,
            required_skills: BTreeSet::new(),
            dependencies: vec![],
            blockers: vec![],
            files: files.iter().map(|f| f.to_string()).collect(),
            assigned_agent: None,
            estimated_minutes: 1,
            retry_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
            actual_minutes: None,
            output: None,
            metadata: None,
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        tasks: Arc<Mutex<TaskTable>>,
        agents: Arc<Mutex<AgentTable>>,
        leases: LeaseManager,
        messages: SharedMessageBus,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        layout.ensure_dirs().unwrap();
        let tasks = Arc::new(Mutex::new(TaskTable::open(layout.tasks_jsonl()).unwrap()));
        let agents = Arc::new(Mutex::new(AgentTable::open(layout.agents_file()).unwrap()));
        let leases = LeaseManager::new(LeaseTable::open(layout.leases_file()).unwrap());
        let messages = SharedMessageBus::new(MessageStore::new(layout).unwrap());
        Fixture { _tmp: tmp, tasks, agents, leases, messages }
    }

    fn harness(fx: &Fixture, adapter: Arc<dyn ModelAdapter>) -> Arc<AgentHarness> {
        Arc::new(AgentHarness::new(
            AgentHarnessConfig {
                id: "agent-1".into(),
                name: "agent-1".into(),
                agent_type: "mock".into(),
                skills: BTreeSet::new(),
                system_prompt: "sp".into(),
            },
            fx.tasks.clone(),
            fx.agents.clone(),
            fx.leases.clone(),
            fx.messages.clone(),
            adapter,
            settings(),
            fx._tmp.path().to_path_buf(),
        ))
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let fx = fixture();
        let h = harness(&fx, Arc::new(crate::model_adapter::MockAdapter::new()));
        h.start().await.unwrap();
        let err = h.start().await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyRunning(_)));
        h.stop().await.unwrap();
    }

    #[tokio::test]
    async fn claims_and_completes_a_ready_task() {
        let fx = fixture();
        {
            let mut tasks = fx.tasks.lock().await;
            tasks.create(sample_task("bd-1", &[])).unwrap();
        }
        let h = harness(&fx, Arc::new(crate::model_adapter::MockAdapter::new()));
        let mut events = h.events();
        h.start().await.unwrap();

        let mut saw_completed = false;
        for _ in 0..50 {
            if let Ok(AgentEvent::TaskCompleted { task_id }) = events.try_recv() {
                assert_eq!(task_id, "bd-1");
                saw_completed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(saw_completed, "expected task_completed event");

        let tasks = fx.tasks.lock().await;
        assert_eq!(tasks.get("bd-1").unwrap().status, TaskStatus::Completed);
        drop(tasks);
        h.stop().await.unwrap();
    }

    #[tokio::test]
    async fn lease_contention_fails_the_task_without_running_the_adapter() {
        let fx = fixture();
        {
            let mut tasks = fx.tasks.lock().await;
            tasks.create(sample_task("bd-1", &["src/shared.ts"])).unwrap();
        }
        fx.leases
            .acquire("src/shared.ts", "other-agent", Duration::from_secs(60), None)
            .await
            .unwrap();

        let adapter = Arc::new(crate::model_adapter::MockAdapter::new());
        let h = harness(&fx, adapter.clone());
        h.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let tasks = fx.tasks.lock().await;
        assert_eq!(tasks.get("bd-1").unwrap().status, TaskStatus::Failed);
        drop(tasks);
        assert_eq!(adapter.call_count(), 0, "adapter must never run when leasing fails");
        h.stop().await.unwrap();
    }
}
