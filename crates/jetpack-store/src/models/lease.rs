use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An advisory exclusive reservation over a resource key (typically a
/// relative file path). Persisted wholesale in `.jetpack/mail/leases.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub path: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
