//! `jetpack-core`: the coordination kernel built on top of `jetpack-store`.
//!
//! Wires the DataStore's tables into the concurrency-aware façades
//! (`LeaseManager`, `MessageBus`) consumed by [`AgentHarness`], and the
//! [`Orchestrator`] that owns a process's full set of harnesses.

pub mod agent_harness;
pub mod config;
pub mod error;
pub mod lease_manager;
pub mod message_bus;
pub mod model_adapter;
pub mod orchestrator;
pub mod plan;
pub mod task_store;

pub use agent_harness::{AgentEvent, AgentHarness, AgentHarnessConfig};
pub use config::{AgentPreset, AgentSettings, RuntimeMode, RuntimeSettings, Settings};
pub use error::{CoreError, CoreResult};
pub use lease_manager::{AcquireResult, LeaseManager};
pub use message_bus::{AckStatus, SearchFilters, SharedMessageBus};
pub use model_adapter::ModelAdapter;
pub use orchestrator::{Orchestrator, OrchestratorEvent};
