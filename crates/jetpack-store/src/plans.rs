//! Plan documents: `.jetpack/plans/<planId>.json`, one file per plan.
//!
//! Plans are produced by an external collaborator (the supervisor planner)
//! and consumed here; the store only loads/saves/lists them verbatim.

use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};
use crate::models::Plan;
use crate::paths::Layout;

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub struct PlanStore {
    layout: Layout,
}

impl PlanStore {
    pub fn new(layout: Layout) -> StoreResult<Self> {
        std::fs::create_dir_all(layout.plans_dir()).map_err(|e| io_err(&layout.plans_dir(), e))?;
        Ok(Self { layout })
    }

    pub fn save(&self, plan: &Plan) -> StoreResult<()> {
        let path = self.layout.plan_file(&plan.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(plan)?;
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    pub fn load(&self, plan_id: &str) -> StoreResult<Option<Plan>> {
        let path = self.layout.plan_file(plan_id);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    pub fn list(&self) -> StoreResult<Vec<Plan>> {
        let dir = self.layout.plans_dir();
        let mut plans = Vec::new();
        if !dir.is_dir() {
            return Ok(plans);
        }
        for entry in std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))? {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            match serde_json::from_str::<Plan>(&contents) {
                Ok(plan) => plans.push(plan),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping malformed plan file");
                }
            }
        }
        Ok(plans)
    }

    pub fn path_for(&self, plan_id: &str) -> PathBuf {
        self.layout.plan_file(plan_id)
    }
}
