//! Record types for every entity the store persists, plus the small
//! `Display`/`FromStr` enums used throughout.

mod agent;
mod enums;
mod lease;
mod message;
mod plan;
mod task;

pub use agent::Agent;
pub use enums::{
    AgentStatus, AgentStatusParseError, MessageType, MessageTypeParseError, PlanItemStatus,
    PlanItemStatusParseError, PlanStatus, PlanStatusParseError, Priority, PriorityParseError,
    TaskStatus, TaskStatusParseError,
};
pub use lease::Lease;
pub use message::Message;
pub use plan::{Plan, PlanItem};
pub use task::{Task, WorkSelectionKey};
