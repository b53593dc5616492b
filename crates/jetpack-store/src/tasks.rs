//! The `tasks` table: `.beads/tasks.jsonl`, replayed last-record-wins per id.
//!
//! Every mutation (create/update/claim) appends a full, current copy of the
//! record; `delete` is the one operation that needs to actually remove a
//! line, so it compacts the log via `AppendLog::rewrite_all`. This keeps
//! the common path pure-append while still giving delete an atomic,
//! single-filesystem-step implementation as required by §9.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::error::{StoreError, StoreResult};
use crate::jsonl::AppendLog;
use crate::models::{Task, TaskStatus};

pub struct TaskTable {
    log: AppendLog<Task>,
    index: BTreeMap<String, Task>,
}

/// Outcome of an atomic claim attempt (§4.1): contention is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyClaimed,
    NotFound,
}

impl TaskTable {
    pub fn open(path: impl Into<std::path::PathBuf>) -> StoreResult<Self> {
        let log = AppendLog::open(path)?;
        let index = Self::build_index(log.records());
        Ok(Self { log, index })
    }

    fn build_index(records: &[Task]) -> BTreeMap<String, Task> {
        let mut index = BTreeMap::new();
        for task in records {
            index.insert(task.id.clone(), task.clone());
        }
        index
    }

    /// Pick up records appended by another process since we last looked.
    pub fn sync(&mut self) -> StoreResult<bool> {
        let changed = self.log.reload_if_changed()?;
        if changed {
            self.index = Self::build_index(self.log.records());
        }
        Ok(changed)
    }

    pub fn create(&mut self, task: Task) -> StoreResult<Task> {
        self.log.append(task.clone())?;
        self.index.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(id)
    }

    pub fn list(&self) -> Vec<Task> {
        self.index.values().cloned().collect()
    }

    /// Persist a task whose fields the caller has already mutated in place.
    pub fn update(&mut self, task: Task) -> StoreResult<Task> {
        if !self.index.contains_key(&task.id) {
            return Err(StoreError::NotFound { id: task.id });
        }
        self.log.append(task.clone())?;
        self.index.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    pub fn delete(&mut self, id: &str) -> StoreResult<bool> {
        if self.index.remove(id).is_none() {
            return Ok(false);
        }
        let remaining: Vec<Task> = self.index.values().cloned().collect();
        self.log.rewrite_all(remaining)?;
        Ok(true)
    }

    /// Atomic claim: succeeds only if the task is currently `pending` or
    /// `ready`. Exactly one caller wins a race because table mutation is
    /// serialized by the caller holding `&mut self` behind a lock.
    pub fn claim(&mut self, id: &str, agent_id: &str) -> StoreResult<ClaimOutcome> {
        let Some(task) = self.index.get(id) else {
            return Ok(ClaimOutcome::NotFound);
        };
        if !task.status.is_claimable() {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        let mut claimed = task.clone();
        claimed.status = TaskStatus::Claimed;
        claimed.assigned_agent = Some(agent_id.to_string());
        claimed.updated_at = Utc::now();
        self.update(claimed)?;
        Ok(ClaimOutcome::Claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use std::collections::BTreeSet;

    fn task(id: &str, status: TaskStatus) -> Task {
        Task {
            id: id.into(),
            title: id.into(),
            description: String::new(),
            status,
            priority: Priority::Medium,
            required_skills: BTreeSet::new(),
            dependencies: vec![],
            blockers: vec![],
            files: vec![],
            assigned_agent: None,
            estimated_minutes: 30,
            retry_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
            actual_minutes: None,
            output: None,
            metadata: None,
        }
    }

    #[test]
    fn create_then_get_roundtrips() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut table = TaskTable::open(tmp.path().join("tasks.jsonl")).unwrap();
        table.create(task("bd-1", TaskStatus::Pending)).unwrap();
        assert_eq!(table.get("bd-1").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn claim_succeeds_from_pending_and_sets_assignee() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut table = TaskTable::open(tmp.path().join("tasks.jsonl")).unwrap();
        table.create(task("bd-1", TaskStatus::Pending)).unwrap();

        let outcome = table.claim("bd-1", "agent-1").unwrap();
        assert_eq!(outcome, ClaimOutcome::Claimed);
        let t = table.get("bd-1").unwrap();
        assert_eq!(t.status, TaskStatus::Claimed);
        assert_eq!(t.assigned_agent.as_deref(), Some("agent-1"));
    }

    #[test]
    fn second_claim_on_already_claimed_task_fails_without_side_effects() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut table = TaskTable::open(tmp.path().join("tasks.jsonl")).unwrap();
        table.create(task("bd-1", TaskStatus::Pending)).unwrap();

        assert_eq!(table.claim("bd-1", "agent-1").unwrap(), ClaimOutcome::Claimed);
        let outcome = table.claim("bd-1", "agent-2").unwrap();
        assert_eq!(outcome, ClaimOutcome::AlreadyClaimed);
        assert_eq!(table.get("bd-1").unwrap().assigned_agent.as_deref(), Some("agent-1"));
    }

    #[test]
    fn claim_missing_task_returns_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut table = TaskTable::open(tmp.path().join("tasks.jsonl")).unwrap();
        assert_eq!(table.claim("bd-missing", "agent-1").unwrap(), ClaimOutcome::NotFound);
    }

    #[test]
    fn delete_removes_record_and_compacts_log() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("tasks.jsonl");
        let mut table = TaskTable::open(&path).unwrap();
        table.create(task("bd-1", TaskStatus::Pending)).unwrap();
        table.create(task("bd-2", TaskStatus::Pending)).unwrap();

        assert!(table.delete("bd-1").unwrap());
        assert!(table.get("bd-1").is_none());

        let reopened = TaskTable::open(&path).unwrap();
        assert!(reopened.get("bd-1").is_none());
        assert!(reopened.get("bd-2").is_some());
    }

    #[test]
    fn update_of_unknown_id_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut table = TaskTable::open(tmp.path().join("tasks.jsonl")).unwrap();
        let err = table.update(task("bd-ghost", TaskStatus::Pending)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn sync_picks_up_tasks_appended_by_another_process() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("tasks.jsonl");
        let mut writer = TaskTable::open(&path).unwrap();
        writer.create(task("bd-1", TaskStatus::Pending)).unwrap();

        let mut reader = TaskTable::open(&path).unwrap();
        writer.create(task("bd-2", TaskStatus::Pending)).unwrap();

        assert!(reader.get("bd-2").is_none());
        assert!(reader.sync().unwrap());
        assert!(reader.get("bd-2").is_some());
    }
}
