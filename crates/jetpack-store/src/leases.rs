//! The lease table: `.jetpack/mail/leases.json`, a whole-file snapshot.
//!
//! Every `acquire`/`check` re-reads the backing file first (§4.3
//! "reload-before-check") so a peer process's concurrent lease shows up
//! immediately rather than after our next unrelated mutation.

use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::models::Lease;
use crate::snapshot;

pub struct LeaseTable {
    path: std::path::PathBuf,
    leases: Vec<Lease>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    Held { holder: String },
}

impl LeaseTable {
    pub fn open(path: impl Into<std::path::PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let leases = snapshot::read(&path)?;
        Ok(Self { path, leases })
    }

    fn reload(&mut self) -> StoreResult<()> {
        self.leases = snapshot::read(&self.path)?;
        Ok(())
    }

    fn persist(&self) -> StoreResult<()> {
        snapshot::write(&self.path, &self.leases)
    }

    fn unexpired_holder(&self, key: &str, now: DateTime<Utc>) -> Option<&Lease> {
        self.leases
            .iter()
            .find(|l| l.path == key && !l.is_expired(now))
    }

    pub fn acquire(
        &mut self,
        key: &str,
        agent_id: &str,
        duration_ms: i64,
        task_id: Option<String>,
    ) -> StoreResult<AcquireOutcome> {
        self.reload()?;
        let now = Utc::now();

        if let Some(existing) = self.unexpired_holder(key, now) {
            if existing.agent_id == agent_id {
                // Same holder re-acquiring is a renewal with a fresh expiry.
                let idx = self.leases.iter().position(|l| l.path == key).unwrap();
                self.leases[idx].timestamp = now;
                self.leases[idx].expires_at = now + chrono::Duration::milliseconds(duration_ms);
                self.leases[idx].task_id = task_id;
                self.persist()?;
                return Ok(AcquireOutcome::Acquired);
            }
            return Ok(AcquireOutcome::Held {
                holder: existing.agent_id.clone(),
            });
        }

        self.leases.retain(|l| l.path != key);
        self.leases.push(Lease {
            path: key.to_string(),
            agent_id: agent_id.to_string(),
            timestamp: now,
            expires_at: now + chrono::Duration::milliseconds(duration_ms),
            task_id,
        });
        self.persist()?;
        Ok(AcquireOutcome::Acquired)
    }

    pub fn renew(&mut self, key: &str, agent_id: &str, duration_ms: i64) -> StoreResult<bool> {
        self.reload()?;
        let now = Utc::now();
        let Some(lease) = self
            .leases
            .iter_mut()
            .find(|l| l.path == key && !l.is_expired(now) && l.agent_id == agent_id)
        else {
            return Ok(false);
        };
        lease.timestamp = now;
        lease.expires_at = now + chrono::Duration::milliseconds(duration_ms);
        self.persist()?;
        Ok(true)
    }

    pub fn release(&mut self, key: &str, agent_id: &str) -> StoreResult<bool> {
        self.reload()?;
        let before = self.leases.len();
        self.leases
            .retain(|l| !(l.path == key && l.agent_id == agent_id));
        let released = self.leases.len() != before;
        if released {
            self.persist()?;
        }
        Ok(released)
    }

    pub fn check(&mut self, key: &str) -> StoreResult<Option<Lease>> {
        self.reload()?;
        let now = Utc::now();
        Ok(self.unexpired_holder(key, now).cloned())
    }

    /// Release every lease held by `agent_id`, used on graceful harness
    /// shutdown (§4.6).
    pub fn release_all_for_agent(&mut self, agent_id: &str) -> StoreResult<usize> {
        self.reload()?;
        let before = self.leases.len();
        self.leases.retain(|l| l.agent_id != agent_id);
        let removed = before - self.leases.len();
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Remove every expired lease. Returns the keys that were swept.
    pub fn sweep_expired(&mut self) -> StoreResult<Vec<String>> {
        self.reload()?;
        let now = Utc::now();
        let (expired, alive): (Vec<Lease>, Vec<Lease>) =
            self.leases.drain(..).partition(|l| l.is_expired(now));
        self.leases = alive;
        if !expired.is_empty() {
            self.persist()?;
        }
        Ok(expired.into_iter().map(|l| l.path).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_succeeds_when_no_holder() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut table = LeaseTable::open(tmp.path().join("leases.json")).unwrap();
        let outcome = table.acquire("src/x.ts", "agent-1", 60_000, None).unwrap();
        assert_eq!(outcome, AcquireOutcome::Acquired);
    }

    #[test]
    fn second_agent_cannot_acquire_held_lease() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut table = LeaseTable::open(tmp.path().join("leases.json")).unwrap();
        table.acquire("src/x.ts", "agent-1", 60_000, None).unwrap();
        let outcome = table.acquire("src/x.ts", "agent-2", 60_000, None).unwrap();
        assert_eq!(
            outcome,
            AcquireOutcome::Held {
                holder: "agent-1".to_string()
            }
        );
    }

    #[test]
    fn same_holder_reacquiring_is_a_renewal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut table = LeaseTable::open(tmp.path().join("leases.json")).unwrap();
        table.acquire("src/x.ts", "agent-1", 60_000, None).unwrap();
        let outcome = table.acquire("src/x.ts", "agent-1", 120_000, None).unwrap();
        assert_eq!(outcome, AcquireOutcome::Acquired);
    }

    #[test]
    fn zero_duration_lease_is_immediately_expired() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut table = LeaseTable::open(tmp.path().join("leases.json")).unwrap();
        let outcome = table.acquire("src/x.ts", "agent-1", 0, None).unwrap();
        assert_eq!(outcome, AcquireOutcome::Acquired);
        assert!(table.check("src/x.ts").unwrap().is_none());
    }

    #[test]
    fn release_requires_matching_holder() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut table = LeaseTable::open(tmp.path().join("leases.json")).unwrap();
        table.acquire("src/x.ts", "agent-1", 60_000, None).unwrap();
        assert!(!table.release("src/x.ts", "agent-2").unwrap());
        assert!(table.release("src/x.ts", "agent-1").unwrap());
        assert!(!table.release("src/x.ts", "agent-1").unwrap(), "idempotent false once released");
    }

    #[test]
    fn sweep_expired_removes_only_expired_leases() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut table = LeaseTable::open(tmp.path().join("leases.json")).unwrap();
        table.acquire("src/x.ts", "agent-1", 0, None).unwrap();
        table.acquire("src/y.ts", "agent-2", 60_000, None).unwrap();

        let swept = table.sweep_expired().unwrap();
        assert_eq!(swept, vec!["src/x.ts".to_string()]);
        assert!(table.check("src/y.ts").unwrap().is_some());
    }

    #[test]
    fn release_all_for_agent_covers_multiple_keys() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut table = LeaseTable::open(tmp.path().join("leases.json")).unwrap();
        table.acquire("src/x.ts", "agent-1", 60_000, None).unwrap();
        table.acquire("src/y.ts", "agent-1", 60_000, None).unwrap();
        table.acquire("src/z.ts", "agent-2", 60_000, None).unwrap();

        let released = table.release_all_for_agent("agent-1").unwrap();
        assert_eq!(released, 2);
        assert!(table.check("src/z.ts").unwrap().is_some());
    }
}
