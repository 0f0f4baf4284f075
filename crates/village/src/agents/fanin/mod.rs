// Fan-in Execution Module
//
// This module provides priority-based fan-in execution:
// - Task, result and report types
// - Orchestrator racing each task against its deadline

mod orchestrator;
mod types;


pub use orchestrator::*;
pub use types::*;
