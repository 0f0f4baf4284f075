//! Village - task orchestration and agent pooling
//!
//! This crate provides the concurrency core behind the Village assistant:
//! a priority-aware fan-in orchestrator for independent async tasks and a
//! bounded, type-keyed pool of reusable agent workers.

pub mod agents;
pub mod config;
pub mod logging;

pub use agents::fanin::{
    FanInReport, Orchestrator, OrchestratorConfig, Task, TaskPriority, TaskResult, TaskStatus,
};
pub use agents::pool::{AgentPool, PoolConfig, PoolError, PoolStats, PooledAgent, WorkerFactory};
pub use agents::registry::{AgentRegistry, RegistryError, RegistryEvent};
pub use agents::types::AgentConfig;
pub use config::Settings;
