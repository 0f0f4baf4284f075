//! Fan-in Types
//!
//! Task definitions, per-task results and the aggregated report
//! produced by [`Orchestrator::run`](super::Orchestrator::run).

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::config::duration_ms;

/// Boxed zero-argument task action
pub type TaskAction<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// Task priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Gates convergence; a failure may abort the whole batch
    Required,
    /// Best effort; skipped once no longer useful
    Optional,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPriority::Required => write!(f, "required"),
            TaskPriority::Optional => write!(f, "optional"),
        }
    }
}

/// Terminal status of a task.
///
/// A timeout is reported as [`TaskStatus::Failed`] with a message
/// containing "timed out".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    /// Timeout applied to tasks without their own
    #[serde(rename = "defaultTimeoutMs", with = "duration_ms")]
    pub default_timeout: Duration,
    /// Whether a failed required task skips everything still pending
    pub abort_on_required_failure: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            abort_on_required_failure: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_abort_on_required_failure(mut self, abort: bool) -> Self {
        self.abort_on_required_failure = abort;
        self
    }
}

/// A named unit of work submitted to the orchestrator
pub struct Task<T> {
    /// Unique name within one run
    pub name: String,
    /// Priority class
    pub priority: TaskPriority,
    /// Task-specific timeout (overrides config)
    pub timeout: Option<Duration>,
    pub(crate) action: TaskAction<T>,
}

impl<T: Send + 'static> Task<T> {
    /// Create a task from a closure returning a future
    pub fn new<F, Fut>(name: impl Into<String>, priority: TaskPriority, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            priority,
            timeout: None,
            action: Box::new(move || Box::pin(action())),
        }
    }

    pub fn required<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::new(name, TaskPriority::Required, action)
    }

    pub fn optional<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::new(name, TaskPriority::Optional, action)
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_required(&self) -> bool {
        self.priority == TaskPriority::Required
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Result of a single task
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult<T> {
    pub name: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    /// Present iff completed
    pub value: Option<T>,
    /// Present iff failed
    pub error: Option<String>,
    /// Submission to terminal state
    #[serde(rename = "durationMs", with = "duration_ms")]
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl<T> TaskResult<T> {
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }

    pub fn is_skipped(&self) -> bool {
        self.status == TaskStatus::Skipped
    }

    /// True when the failure came from the deadline race
    pub fn is_timeout(&self) -> bool {
        self.is_failed()
            && self
                .error
                .as_deref()
                .is_some_and(|e| e.contains("timed out"))
    }
}

/// Events emitted while a fan-in run progresses
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FanInEvent {
    TaskStarted {
        name: String,
        priority: TaskPriority,
        timeout_ms: u64,
    },
    TaskSettled {
        name: String,
        status: TaskStatus,
        duration_ms: u64,
    },
    /// A required task failed and the remaining tasks were skipped
    Aborted { failed_task: String, skipped: usize },
    /// All required tasks settled; pending optional tasks were skipped
    Converged { skipped: usize },
}

/// Outcome of one [`Orchestrator::run`](super::Orchestrator::run) call.
///
/// Entries are kept in recording order: real completion order, with
/// skipped tasks appended at the point the run stopped waiting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanInReport<T> {
    pub results: IndexMap<String, TaskResult<T>>,
    #[serde(rename = "totalDurationMs", with = "duration_ms")]
    pub total_duration: Duration,
}

impl<T> FanInReport<T> {
    pub fn get(&self, name: &str) -> Option<&TaskResult<T>> {
        self.results.get(name)
    }

    pub fn status(&self, name: &str) -> Option<TaskStatus> {
        self.results.get(name).map(|r| r.status)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskResult<T>> {
        self.results.values()
    }

    /// Task names in recording order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.results.keys().map(String::as_str)
    }

    pub fn completed(&self) -> usize {
        self.count(TaskStatus::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(TaskStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(TaskStatus::Skipped)
    }

    pub fn all_required_completed(&self) -> bool {
        self.results
            .values()
            .filter(|r| r.priority == TaskPriority::Required)
            .all(|r| r.is_completed())
    }

    pub fn into_values(self) -> impl Iterator<Item = TaskResult<T>> {
        self.results.into_values()
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.results.values().filter(|r| r.status == status).count()
    }
}
