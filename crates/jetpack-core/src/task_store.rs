//! `TaskStore` (§4.2): a thin facade over `jetpack_store::TaskTable` plus
//! the derived queries that make dependency-aware scheduling possible.

use std::collections::{BTreeMap, HashMap, HashSet};

use jetpack_store::models::{Task, TaskStatus};
use jetpack_store::{StoreResult, TaskTable};

/// A snapshot of the dependency graph: every task plus the edges from a
/// task to the tasks it depends on. Built on demand from `task.dependencies`
/// id references -- never owned pointers (§9 "graph traversal with
/// back-references").
#[derive(Debug, Clone)]
pub struct TaskGraph {
    pub nodes: Vec<Task>,
    pub edges: HashMap<String, Vec<String>>,
}

/// One layer of `getParallelBatches()`: tasks that depend only on tasks in
/// earlier batches or already-completed tasks.
pub type Batch = Vec<Task>;

/// Scan `{pending, ready, pending_retry}`, upgrading any `pending` task
/// whose dependencies are all completed and whose blockers are empty to
/// `ready` as a side effect, then return every task now in `ready`.
/// `pending_retry` tasks are included only while `retryCount < maxRetries`
/// (§4.6 step 9 "re-enters the ready set when policy allows") -- a
/// `pending_retry` task that has exhausted its budget is the harness's
/// responsibility to flip to `failed`, not this query's. Deterministic
/// given identical inputs: no randomness, ties broken by (priority desc,
/// createdAt asc).
pub fn get_ready_tasks(table: &mut TaskTable, max_retries: u32) -> StoreResult<Vec<Task>> {
    let completed: HashSet<String> = table
        .list()
        .into_iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .map(|t| t.id)
        .collect();

    let mut ready = Vec::new();
    for task in table.list() {
        match task.status {
            TaskStatus::Pending | TaskStatus::Ready => {}
            TaskStatus::PendingRetry if task.retry_count < max_retries => {}
            _ => continue,
        }
        if !task.dependencies_satisfied(|dep| completed.contains(dep)) {
            continue;
        }
        let mut upgraded = task.clone();
        if upgraded.status != TaskStatus::Ready {
            upgraded.status = TaskStatus::Ready;
            upgraded.updated_at = chrono::Utc::now();
            upgraded = table.update(upgraded)?;
        }
        ready.push(upgraded);
    }

    ready.sort_by_key(|t| t.work_selection_key());
    Ok(ready)
}

/// All tasks plus their dependency edges. No cycle detection here -- that
/// is the responsibility of plan-ingest (`crate::plan`); a graph with
/// cycles is a valid (if unexecutable) input to this function.
pub fn build_task_graph(table: &TaskTable) -> TaskGraph {
    let nodes = table.list();
    let edges = nodes
        .iter()
        .map(|t| (t.id.clone(), t.dependencies.clone()))
        .collect();
    TaskGraph { nodes, edges }
}

/// Kahn-style layering over the subset of tasks still eligible to run
/// (excludes `failed`, `in_progress`, `claimed`). Terminates when no
/// further progress is possible; any remaining nodes (a cycle, or tasks
/// blocked on an ineligible task) are simply not returned -- callers
/// diagnose via `build_task_graph`.
pub fn get_parallel_batches(table: &TaskTable) -> Vec<Batch> {
    let eligible: BTreeMap<String, Task> = table
        .list()
        .into_iter()
        .filter(|t| {
            !matches!(
                t.status,
                TaskStatus::Failed | TaskStatus::InProgress | TaskStatus::Claimed
            )
        })
        .map(|t| (t.id.clone(), t))
        .collect();

    let completed: HashSet<String> = table
        .list()
        .into_iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .map(|t| t.id)
        .collect();

    let mut satisfied: HashSet<String> = completed;
    let mut remaining: BTreeMap<String, Task> = eligible
        .into_iter()
        .filter(|(id, _)| !satisfied.contains(id))
        .collect();

    let mut batches = Vec::new();
    loop {
        let mut layer: Vec<Task> = remaining
            .values()
            .filter(|t| t.dependencies.iter().all(|d| satisfied.contains(d)))
            .cloned()
            .collect();
        if layer.is_empty() {
            break;
        }
        layer.sort_by_key(|t| t.work_selection_key());
        for t in &layer {
            remaining.remove(&t.id);
            satisfied.insert(t.id.clone());
        }
        batches.push(layer);
    }
    batches
}

/// Tasks that appear in the dependency lists of at least `min_dependents`
/// other tasks, sorted descending by dependent count.
pub fn detect_bottlenecks(table: &TaskTable, min_dependents: usize) -> Vec<(Task, usize)> {
    let tasks = table.list();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for task in &tasks {
        for dep in &task.dependencies {
            *counts.entry(dep.clone()).or_insert(0) += 1;
        }
    }
    let mut bottlenecks: Vec<(Task, usize)> = tasks
        .into_iter()
        .filter_map(|t| counts.get(&t.id).copied().map(|c| (t, c)))
        .filter(|(_, count)| *count >= min_dependents)
        .collect();
    bottlenecks.sort_by(|a, b| b.1.cmp(&a.1));
    bottlenecks
}
