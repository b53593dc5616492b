//! The agent registry: `.jetpack/agents.json`, a whole-file snapshot
//! rewritten on every change (the live agent set is small).

use chrono::Utc;

use crate::error::StoreResult;
use crate::models::{Agent, AgentStatus};
use crate::snapshot;

pub struct AgentTable {
    path: std::path::PathBuf,
    agents: Vec<Agent>,
}

impl AgentTable {
    pub fn open(path: impl Into<std::path::PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let agents = snapshot::read(&path)?;
        Ok(Self { path, agents })
    }

    pub fn sync(&mut self) -> StoreResult<()> {
        self.agents = snapshot::read(&self.path)?;
        Ok(())
    }

    fn persist(&self) -> StoreResult<()> {
        snapshot::write(&self.path, &self.agents)
    }

    pub fn register(&mut self, agent: Agent) -> StoreResult<Agent> {
        self.agents.retain(|a| a.id != agent.id);
        self.agents.push(agent.clone());
        self.persist()?;
        Ok(agent)
    }

    pub fn get(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn list(&self) -> &[Agent] {
        &self.agents
    }

    pub fn heartbeat(&mut self, id: &str) -> StoreResult<bool> {
        let Some(agent) = self.agents.iter_mut().find(|a| a.id == id) else {
            return Ok(false);
        };
        agent.last_heartbeat_at = Utc::now();
        self.persist()?;
        Ok(true)
    }

    pub fn set_status(&mut self, id: &str, status: AgentStatus) -> StoreResult<bool> {
        let Some(agent) = self.agents.iter_mut().find(|a| a.id == id) else {
            return Ok(false);
        };
        agent.status = status;
        self.persist()?;
        Ok(true)
    }

    pub fn record_completion(&mut self, id: &str, succeeded: bool) -> StoreResult<()> {
        if let Some(agent) = self.agents.iter_mut().find(|a| a.id == id) {
            if succeeded {
                agent.tasks_completed += 1;
            } else {
                agent.tasks_failed += 1;
            }
            self.persist()?;
        }
        Ok(())
    }

    pub fn deregister(&mut self, id: &str) -> StoreResult<bool> {
        let before = self.agents.len();
        self.agents.retain(|a| a.id != id);
        let removed = self.agents.len() != before;
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Mark agents whose heartbeat predates `threshold` as offline. Returns
    /// the ids that flipped.
    pub fn mark_stale_offline(&mut self, threshold: chrono::Duration) -> StoreResult<Vec<String>> {
        let now = Utc::now();
        let mut flipped = Vec::new();
        for agent in &mut self.agents {
            if agent.status != AgentStatus::Offline && agent.is_stale(now, threshold) {
                agent.status = AgentStatus::Offline;
                flipped.push(agent.id.clone());
            }
        }
        if !flipped.is_empty() {
            self.persist()?;
        }
        Ok(flipped)
    }
}
