//! Plan ingest (§4.2 "cycles are declared an input error... detect and
//! report cycles at plan-ingest time") and materialization of plan items
//! into tasks.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;
use uuid::Uuid;

use jetpack_store::models::{Plan, PlanItem, Task, TaskStatus};
use jetpack_store::{TaskError, TaskResult};

/// DFS-based cycle detection over `PlanItem.dependencies` (item-id
/// references within the same plan). Returns the participants of the first
/// cycle found, in visitation order, if any.
pub fn detect_cycle(plan: &Plan) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Done,
    }

    let by_id: HashMap<&str, &PlanItem> = plan.items.iter().map(|i| (i.id.as_str(), i)).collect();
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack: Vec<String> = Vec::new();

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a PlanItem>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match marks.get(id) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|s| s == id).unwrap_or(0);
                return Some(stack[start..].to_vec());
            }
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        stack.push(id.to_string());
        if let Some(item) = by_id.get(id) {
            for dep in &item.dependencies {
                if let Some(cycle) = visit(dep, by_id, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(id, Mark::Done);
        None
    }

    for item in &plan.items {
        if let Some(cycle) = visit(&item.id, &by_id, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

/// Turn every item of `plan` into a [`Task`], refusing up front if the plan
/// contains a cycle or an item depends on an id not present in the plan.
/// Item-id dependency references are rewritten to the generated task ids;
/// `metadata.planId`/`metadata.planItemId` trace each task back to its
/// origin.
pub fn materialize(plan: &Plan) -> TaskResult<Vec<Task>> {
    if let Some(cycle) = detect_cycle(plan) {
        return Err(TaskError::CyclicPlan { item_ids: cycle });
    }

    let item_ids: BTreeSet<&str> = plan.items.iter().map(|i| i.id.as_str()).collect();
    let mut task_ids: BTreeMap<&str, String> = BTreeMap::new();
    for item in &plan.items {
        task_ids.insert(item.id.as_str(), format!("bd-{}", Uuid::new_v4()));
    }

    let now = Utc::now();
    let mut tasks = Vec::with_capacity(plan.items.len());
    for item in &plan.items {
        for dep in &item.dependencies {
            if !item_ids.contains(dep.as_str()) {
                return Err(TaskError::UnknownDependency {
                    task_id: item.id.clone(),
                    dep_id: dep.clone(),
                });
            }
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("planId".to_string(), serde_json::Value::String(plan.id.clone()));
        metadata.insert("planItemId".to_string(), serde_json::Value::String(item.id.clone()));

        tasks.push(Task {
            id: task_ids[item.id.as_str()].clone(),
            title: item.title.clone(),
            description: item.description.clone().unwrap_or_default(),
            status: TaskStatus::Pending,
            priority: item.priority,
            required_skills: item.skills.iter().cloned().collect(),
            dependencies: item.dependencies.iter().map(|d| task_ids[d.as_str()].clone()).collect(),
            blockers: vec![],
            files: vec![],
            assigned_agent: None,
            estimated_minutes: item.estimated_minutes.unwrap_or(30),
            retry_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            actual_minutes: None,
            output: None,
            metadata: Some(metadata),
        });
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jetpack_store::models::{PlanItemStatus, PlanStatus, Priority};

    fn item(id: &str, deps: &[&str]) -> PlanItem {
        PlanItem {
            id: id.into(),
            title: id.into(),
            status: PlanItemStatus::Pending,
            priority: Priority::Medium,
            skills: vec![],
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            estimated_minutes: Some(20),
            description: None,
        }
    }

    fn plan(items: Vec<PlanItem>) -> Plan {
        Plan {
            id: "plan-1".into(),
            title: "p".into(),
            status: PlanStatus::Draft,
            items,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn acyclic_plan_has_no_cycle() {
        let p = plan(vec![item("a", &[]), item("b", &["a"])]);
        assert!(detect_cycle(&p).is_none());
    }

    #[test]
    fn direct_cycle_is_detected() {
        let p = plan(vec![item("a", &["b"]), item("b", &["a"])]);
        let cycle = detect_cycle(&p).unwrap();
        assert!(cycle.contains(&"a".to_string()));
        assert!(cycle.contains(&"b".to_string()));
    }

    #[test]
    fn materialize_rewrites_item_ids_to_task_ids_and_sets_metadata() {
        let p = plan(vec![item("a", &[]), item("b", &["a"])]);
        let tasks = materialize(&p).unwrap();
        let a = tasks.iter().find(|t| t.title == "a").unwrap();
        let b = tasks.iter().find(|t| t.title == "b").unwrap();
        assert_eq!(b.dependencies, vec![a.id.clone()]);
        assert!(a.id.starts_with("bd-"));
        let metadata = a.metadata.as_ref().unwrap();
        assert_eq!(metadata["planId"], serde_json::json!("plan-1"));
        assert_eq!(metadata["planItemId"], serde_json::json!("a"));
    }

    #[test]
    fn materialize_refuses_a_cyclic_plan() {
        let p = plan(vec![item("a", &["b"]), item("b", &["a"])]);
        let err = materialize(&p).unwrap_err();
        assert!(matches!(err, TaskError::CyclicPlan { .. }));
    }

    #[test]
    fn materialize_refuses_an_unknown_dependency() {
        let p = plan(vec![item("a", &["ghost"])]);
        let err = materialize(&p).unwrap_err();
        assert!(matches!(err, TaskError::UnknownDependency { .. }));
    }
}
