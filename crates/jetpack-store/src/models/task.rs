use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::{Priority, TaskStatus};

/// A unit of work tracked by the task store. Mirrors the `.beads/tasks.jsonl`
/// record shape field for field; `rename_all = "camelCase"` plus a handful of
/// explicit renames covers the on-disk names exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub required_skills: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blockers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    pub estimated_minutes: u32,
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl Task {
    /// `ready` requires every dependency completed and no outstanding
    /// blockers, per the invariant in §3 of the task's governing contract.
    pub fn dependencies_satisfied(&self, completed: impl Fn(&str) -> bool) -> bool {
        self.blockers.is_empty() && self.dependencies.iter().all(|d| completed(d))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WorkSelectionKey {
    pub priority_rank: std::cmp::Reverse<Priority>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Sort key for work selection: priority descending, then createdAt
    /// ascending -- a stable comparator so equal-priority ties never
    /// reorder by insertion order.
    pub fn work_selection_key(&self) -> WorkSelectionKey {
        WorkSelectionKey {
            priority_rank: std::cmp::Reverse(self.priority),
            created_at: self.created_at,
        }
    }
}
