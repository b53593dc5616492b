//! `LeaseManager` (§4.3): cooperative exclusive locking over opaque string
//! keys, layered over `jetpack_store::LeaseTable` with a `Duration`-based
//! API and a background expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use jetpack_store::leases::AcquireOutcome;
use jetpack_store::models::Lease;
use jetpack_store::{LeaseTable, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireResult {
    Acquired,
    Held { holder: String },
}

/// Thread-safe handle to the lease table, shared by every harness in the
/// process plus the background sweep task.
#[derive(Clone)]
pub struct LeaseManager {
    table: Arc<Mutex<LeaseTable>>,
}

impl LeaseManager {
    pub fn new(table: LeaseTable) -> Self {
        Self { table: Arc::new(Mutex::new(table)) }
    }

    pub async fn acquire(
        &self,
        key: &str,
        agent_id: &str,
        duration: Duration,
        task_id: Option<String>,
    ) -> StoreResult<AcquireResult> {
        let mut table = self.table.lock().await;
        let outcome = table.acquire(key, agent_id, duration.as_millis() as i64, task_id)?;
        Ok(match outcome {
            AcquireOutcome::Acquired => AcquireResult::Acquired,
            AcquireOutcome::Held { holder } => AcquireResult::Held { holder },
        })
    }

    pub async fn renew(&self, key: &str, agent_id: &str, duration: Duration) -> StoreResult<bool> {
        let mut table = self.table.lock().await;
        table.renew(key, agent_id, duration.as_millis() as i64)
    }

    pub async fn release(&self, key: &str, agent_id: &str) -> StoreResult<bool> {
        let mut table = self.table.lock().await;
        table.release(key, agent_id)
    }

    pub async fn check(&self, key: &str) -> StoreResult<Option<Lease>> {
        let mut table = self.table.lock().await;
        table.check(key)
    }

    pub async fn release_all_for_agent(&self, agent_id: &str) -> StoreResult<usize> {
        let mut table = self.table.lock().await;
        table.release_all_for_agent(agent_id)
    }

    /// Acquire every key in `keys` for `agent_id`. On the first failure,
    /// release everything acquired so far and return the failing key and
    /// its holder -- callers use this to implement the "release all
    /// acquired leases" rollback in the work-claim loop (§4.6 step 5).
    pub async fn acquire_all(
        &self,
        keys: &[String],
        agent_id: &str,
        duration: Duration,
        task_id: Option<String>,
    ) -> StoreResult<Result<(), (String, String)>> {
        let mut acquired = Vec::new();
        for key in keys {
            match self.acquire(key, agent_id, duration, task_id.clone()).await? {
                AcquireResult::Acquired => acquired.push(key.clone()),
                AcquireResult::Held { holder } => {
                    for k in &acquired {
                        self.release(k, agent_id).await?;
                    }
                    return Ok(Err((key.clone(), holder)));
                }
            }
        }
        Ok(Ok(()))
    }

    /// Spawn the background expiry sweep (§4.3 "Expiry sweep", default
    /// interval 60s). The returned handle is aborted on harness/orchestrator
    /// shutdown.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let mut table = manager.table.lock().await;
                match table.sweep_expired() {
                    Ok(swept) if !swept.is_empty() => {
                        tracing::debug!(count = swept.len(), "swept expired leases");
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "lease sweep failed"),
                }
            }
        })
    }
}
