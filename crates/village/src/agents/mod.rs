/// Priority-based fan-in execution module
///
/// Runs independent async tasks concurrently with per-task timeouts and
/// converges once every required task has settled.
pub mod fanin;

/// Agent pooling module
///
/// Provides a bounded pool of reusable agent workers keyed by type,
/// with idle eviction.
pub mod pool;

/// Named agent registry
///
/// Tracks explicitly created agents and the currently selected one.
pub mod registry;

/// Shared agent configuration types
pub mod types;
