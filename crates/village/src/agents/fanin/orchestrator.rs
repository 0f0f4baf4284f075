//! Fan-in Orchestrator
//!
//! Runs a batch of independent async tasks concurrently and converges as
//! soon as every required task has settled.
//!
//! # Behavior
//! - Every action starts immediately; there is no concurrency cap here
//! - Each action races its own deadline (task timeout or the configured default)
//! - Outcomes are recorded in real completion order
//! - A failed required task skips everything still pending (configurable)
//! - Once all required tasks settle, pending optional tasks are skipped
//!
//! Skipping and timeouts stop *waiting*, they do not stop the action: the
//! spawned future keeps running detached and its result is discarded.

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::types::*;
use crate::config::duration_ms;

type EventCallback = Arc<dyn Fn(FanInEvent) + Send + Sync>;

enum Outcome<T> {
    Completed(T),
    Failed(String),
}

struct Started {
    priority: TaskPriority,
    at: Instant,
    at_utc: DateTime<Utc>,
}

/// Priority-aware fan-in orchestrator
///
/// The orchestrator holds no per-run state, so one instance may serve
/// any number of concurrent [`run`](Self::run) calls.
#[derive(Clone, Default)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    event_callback: Option<EventCallback>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            event_callback: None,
        }
    }

    /// Set event callback
    pub fn with_event_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(FanInEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run all tasks and return one result per submitted task.
    ///
    /// This never fails. Task names must be unique; a duplicate name is a
    /// programming error and panics.
    pub async fn run<T>(&self, tasks: Vec<Task<T>>) -> FanInReport<T>
    where
        T: Send + 'static,
    {
        let run_started = Instant::now();
        let total = tasks.len();
        let required_total = tasks.iter().filter(|t| t.is_required()).count();

        info!(
            tasks = total,
            required = required_total,
            "starting fan-in execution"
        );

        let mut order: Vec<String> = Vec::with_capacity(total);
        let mut started: HashMap<String, Started> = HashMap::with_capacity(total);
        let mut pending = FuturesUnordered::new();

        for task in tasks {
            let Task {
                name,
                priority,
                timeout,
                action,
            } = task;
            assert!(
                !started.contains_key(&name),
                "duplicate task name '{}' submitted to orchestrator",
                name
            );

            let limit = timeout.unwrap_or(self.config.default_timeout);
            debug!(task = %name, %priority, timeout_ms = duration_ms::to_millis(limit), "task started");
            self.emit(FanInEvent::TaskStarted {
                name: name.clone(),
                priority,
                timeout_ms: duration_ms::to_millis(limit),
            });

            started.insert(
                name.clone(),
                Started {
                    priority,
                    at: Instant::now(),
                    at_utc: Utc::now(),
                },
            );
            let handle = tokio::spawn(action());
            pending.push(race_deadline(name.clone(), handle, limit));
            order.push(name);
        }

        let mut results: IndexMap<String, TaskResult<T>> = IndexMap::with_capacity(total);
        let mut required_settled = 0usize;

        while let Some((name, outcome)) = pending.next().await {
            let Some(start) = started.get(&name) else {
                continue;
            };
            let priority = start.priority;
            let result = settle(&name, start, outcome);
            let failed = result.is_failed();

            if let Some(error) = &result.error {
                warn!(task = %name, %priority, error = %error, "task failed");
            } else {
                debug!(task = %name, duration_ms = duration_ms::to_millis(result.duration), "task completed");
            }
            self.emit(FanInEvent::TaskSettled {
                name: name.clone(),
                status: result.status,
                duration_ms: duration_ms::to_millis(result.duration),
            });
            results.insert(name.clone(), result);

            if priority == TaskPriority::Required {
                required_settled += 1;
                if failed && self.config.abort_on_required_failure {
                    let skipped = skip_unsettled(&order, &started, &mut results, |_| true);
                    warn!(task = %name, skipped, "required task failed, aborting pending tasks");
                    self.emit(FanInEvent::Aborted {
                        failed_task: name,
                        skipped,
                    });
                    break;
                }
            }

            if required_settled == required_total {
                let skipped = skip_unsettled(&order, &started, &mut results, |p| {
                    p == TaskPriority::Optional
                });
                if skipped > 0 {
                    debug!(skipped, "required tasks settled, skipping pending optional tasks");
                }
                self.emit(FanInEvent::Converged { skipped });
                break;
            }
        }

        if !pending.is_empty() {
            debug!(
                abandoned = pending.len(),
                "leaving unsettled actions running detached"
            );
        }

        let report = FanInReport {
            results,
            total_duration: run_started.elapsed(),
        };
        info!(
            completed = report.completed(),
            failed = report.failed(),
            skipped = report.skipped(),
            duration_ms = duration_ms::to_millis(report.total_duration),
            "fan-in execution finished"
        );
        report
    }

    fn emit(&self, event: FanInEvent) {
        if let Some(callback) = &self.event_callback {
            callback(event);
        }
    }
}

/// Await the spawned action or its deadline, whichever comes first.
///
/// On timeout the join handle is dropped, which detaches the action
/// rather than aborting it.
async fn race_deadline<T>(
    name: String,
    handle: JoinHandle<anyhow::Result<T>>,
    limit: Duration,
) -> (String, Outcome<T>) {
    let outcome = match tokio::time::timeout(limit, handle).await {
        Ok(Ok(Ok(value))) => Outcome::Completed(value),
        Ok(Ok(Err(e))) => Outcome::Failed(format!("{:#}", e)),
        Ok(Err(join_error)) if join_error.is_panic() => {
            Outcome::Failed(format!("Task '{}' panicked", name))
        }
        Ok(Err(_)) => Outcome::Failed(format!("Task '{}' was cancelled", name)),
        Err(_) => Outcome::Failed(format!(
            "Task '{}' timed out after {}ms",
            name,
            limit.as_millis()
        )),
    };
    (name, outcome)
}

fn settle<T>(name: &str, start: &Started, outcome: Outcome<T>) -> TaskResult<T> {
    let (status, value, error) = match outcome {
        Outcome::Completed(value) => (TaskStatus::Completed, Some(value), None),
        Outcome::Failed(error) => (TaskStatus::Failed, None, Some(error)),
    };
    TaskResult {
        name: name.to_string(),
        priority: start.priority,
        status,
        value,
        error,
        duration: start.at.elapsed(),
        started_at: start.at_utc,
        finished_at: Utc::now(),
    }
}

/// Mark every unsettled task accepted by `filter` as skipped.
fn skip_unsettled<T>(
    order: &[String],
    started: &HashMap<String, Started>,
    results: &mut IndexMap<String, TaskResult<T>>,
    filter: impl Fn(TaskPriority) -> bool,
) -> usize {
    let mut skipped = 0;
    for name in order {
        if results.contains_key(name) {
            continue;
        }
        let Some(start) = started.get(name) else {
            continue;
        };
        if !filter(start.priority) {
            continue;
        }
        results.insert(
            name.clone(),
            TaskResult {
                name: name.clone(),
                priority: start.priority,
                status: TaskStatus::Skipped,
                value: None,
                error: None,
                duration: start.at.elapsed(),
                started_at: start.at_utc,
                finished_at: Utc::now(),
            },
        );
        skipped += 1;
    }
    skipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::sleep;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn delayed<T: Send + 'static>(
        name: &str,
        priority: TaskPriority,
        delay: u64,
        value: T,
    ) -> Task<T> {
        Task::new(name, priority, move || async move {
            sleep(ms(delay)).await;
            Ok(value)
        })
    }

    fn failing<T: Send + 'static>(name: &str, priority: TaskPriority, message: &str) -> Task<T> {
        let message = message.to_string();
        Task::new(name, priority, move || async move { Err(anyhow!(message)) })
    }

    #[tokio::test]
    async fn test_completes_when_all_required_finish() {
        let orchestrator = Orchestrator::default();

        let report = orchestrator
            .run(vec![
                delayed("git", TaskPriority::Required, 100, 10),
                delayed("notion", TaskPriority::Required, 150, 5),
                delayed("slack", TaskPriority::Optional, 1000, 100),
            ])
            .await;

        assert_eq!(report.status("git"), Some(TaskStatus::Completed));
        assert_eq!(report.status("notion"), Some(TaskStatus::Completed));
        assert_eq!(report.status("slack"), Some(TaskStatus::Skipped));
        assert_eq!(report.get("git").unwrap().value, Some(10));
        assert!(report.get("slack").unwrap().value.is_none());
        assert!(report.total_duration < ms(1000));
    }

    #[tokio::test]
    async fn test_keeps_optional_that_finish_before_required() {
        let orchestrator = Orchestrator::default();

        let report = orchestrator
            .run(vec![
                delayed("slow-required", TaskPriority::Required, 200, "slow"),
                delayed("fast-optional", TaskPriority::Optional, 50, "fast"),
            ])
            .await;

        assert_eq!(report.status("slow-required"), Some(TaskStatus::Completed));
        assert_eq!(report.status("fast-optional"), Some(TaskStatus::Completed));
        // recording follows completion order, not submission order
        assert_eq!(
            report.names().collect::<Vec<_>>(),
            vec!["fast-optional", "slow-required"]
        );
    }

    #[tokio::test]
    async fn test_times_out_slow_tasks() {
        let orchestrator =
            Orchestrator::new(OrchestratorConfig::default().with_default_timeout(ms(100)));

        let report = orchestrator
            .run(vec![delayed("slow-task", TaskPriority::Required, 200, ())])
            .await;

        let result = report.get("slow-task").unwrap();
        assert_eq!(result.status, TaskStatus::Failed);
        let error = result.error.as_deref().unwrap();
        assert!(error.contains("timed out"));
        assert!(error.contains("100ms"));
        assert!(error.contains("slow-task"));
        assert!(result.is_timeout());
    }

    #[tokio::test]
    async fn test_task_timeout_overrides_default() {
        let orchestrator =
            Orchestrator::new(OrchestratorConfig::default().with_default_timeout(ms(50)));

        let report = orchestrator
            .run(vec![
                delayed("custom-timeout", TaskPriority::Required, 100, ()).with_timeout(ms(200))
            ])
            .await;

        assert_eq!(report.status("custom-timeout"), Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_required_timeout_skips_pending_optional() {
        let orchestrator =
            Orchestrator::new(OrchestratorConfig::default().with_default_timeout(ms(80)));

        let report = orchestrator
            .run(vec![
                delayed("slow-required", TaskPriority::Required, 500, ()),
                delayed("slow-optional", TaskPriority::Optional, 400, ()).with_timeout(ms(1000)),
            ])
            .await;

        let slow = report.get("slow-required").unwrap();
        assert_eq!(slow.status, TaskStatus::Failed);
        assert!(slow.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(report.status("slow-optional"), Some(TaskStatus::Skipped));
    }

    #[tokio::test]
    async fn test_aborts_on_required_failure_by_default() {
        let orchestrator = Orchestrator::default();
        let started = Instant::now();

        let report = orchestrator
            .run(vec![
                failing::<&str>("failing-required", TaskPriority::Required, "Required task failed"),
                delayed("pending-optional", TaskPriority::Optional, 1000, "late"),
            ])
            .await;

        let failed = report.get("failing-required").unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("Required task failed"));
        assert_eq!(report.status("pending-optional"), Some(TaskStatus::Skipped));
        assert!(started.elapsed() < ms(1000));
    }

    #[tokio::test]
    async fn test_abort_also_skips_pending_required() {
        let orchestrator = Orchestrator::default();

        let report = orchestrator
            .run(vec![
                failing::<()>("broken", TaskPriority::Required, "nope"),
                delayed("slow-required", TaskPriority::Required, 500, ()),
            ])
            .await;

        assert_eq!(report.status("broken"), Some(TaskStatus::Failed));
        assert_eq!(report.status("slow-required"), Some(TaskStatus::Skipped));
    }

    #[tokio::test]
    async fn test_continues_on_optional_failure() {
        let orchestrator = Orchestrator::default();

        let report = orchestrator
            .run(vec![
                delayed("good-required", TaskPriority::Required, 100, "success"),
                failing("failing-optional", TaskPriority::Optional, "Optional failed"),
            ])
            .await;

        assert_eq!(report.status("good-required"), Some(TaskStatus::Completed));
        assert_eq!(report.status("failing-optional"), Some(TaskStatus::Failed));
        assert_eq!(
            report.get("failing-optional").unwrap().error.as_deref(),
            Some("Optional failed")
        );
    }

    #[tokio::test]
    async fn test_no_abort_when_disabled() {
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default().with_abort_on_required_failure(false),
        );

        let report = orchestrator
            .run(vec![
                failing("failing-required", TaskPriority::Required, "Failed"),
                delayed("slow-required", TaskPriority::Required, 100, "completed"),
            ])
            .await;

        assert_eq!(report.status("failing-required"), Some(TaskStatus::Failed));
        assert_eq!(report.status("slow-required"), Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_tracks_duration() {
        let orchestrator = Orchestrator::default();

        let report = orchestrator
            .run(vec![delayed("timed-task", TaskPriority::Required, 100, ())])
            .await;

        let result = report.get("timed-task").unwrap();
        assert!(result.duration >= ms(100));
        assert!(result.duration < ms(300));
        assert!(result.finished_at >= result.started_at);
    }

    #[tokio::test]
    async fn test_empty_task_list() {
        let report = Orchestrator::default().run(Vec::<Task<()>>::new()).await;

        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_action_is_a_failure() {
        let blow_up = true;
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default().with_abort_on_required_failure(false),
        );

        let report = orchestrator
            .run(vec![
                Task::<()>::required("explodes", move || async move {
                    assert!(!blow_up, "kaboom");
                    Ok(())
                }),
                delayed("steady", TaskPriority::Required, 20, ()),
            ])
            .await;

        let result = report.get("explodes").unwrap();
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("panicked"));
        assert_eq!(report.status("steady"), Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_error_chain_is_preserved() {
        let orchestrator = Orchestrator::default();

        let report = orchestrator
            .run(vec![Task::<()>::required("fetch", || async {
                Err(anyhow!("connection refused").context("fetching notion pages"))
            })])
            .await;

        assert_eq!(
            report.get("fetch").unwrap().error.as_deref(),
            Some("fetching notion pages: connection refused")
        );
    }

    #[tokio::test]
    async fn test_timed_out_action_keeps_running_detached() {
        let orchestrator =
            Orchestrator::new(OrchestratorConfig::default().with_default_timeout(ms(30)));
        let landed = Arc::new(AtomicBool::new(false));
        let flag = landed.clone();

        let report = orchestrator
            .run(vec![Task::required("lingering", move || async move {
                sleep(ms(120)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })])
            .await;

        assert!(report.get("lingering").unwrap().is_timeout());
        assert!(!landed.load(Ordering::SeqCst));

        // the side effect still lands after run returned
        sleep(ms(250)).await;
        assert!(landed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    #[should_panic(expected = "duplicate task name")]
    async fn test_duplicate_names_panic() {
        Orchestrator::default()
            .run(vec![
                delayed("same", TaskPriority::Required, 1, ()),
                delayed("same", TaskPriority::Optional, 1, ()),
            ])
            .await;
    }

    #[tokio::test]
    async fn test_emits_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let orchestrator =
            Orchestrator::default().with_event_callback(move |e| sink.lock().push(e));

        orchestrator
            .run(vec![
                delayed("req", TaskPriority::Required, 20, ()),
                delayed("opt", TaskPriority::Optional, 500, ()),
            ])
            .await;

        let events = events.lock();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], FanInEvent::TaskStarted { .. }));
        assert!(matches!(
            &events[2],
            FanInEvent::TaskSettled { name, status: TaskStatus::Completed, .. } if name == "req"
        ));
        assert_eq!(events[3], FanInEvent::Converged { skipped: 1 });
    }

    #[tokio::test]
    async fn test_abort_wins_when_last_required_fails() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let orchestrator =
            Orchestrator::default().with_event_callback(move |e| sink.lock().push(e));

        let report = orchestrator
            .run(vec![
                delayed("a", TaskPriority::Required, 10, ()),
                Task::required("b", || async {
                    sleep(ms(40)).await;
                    Err(anyhow!("b broke"))
                }),
                delayed("c", TaskPriority::Optional, 500, ()),
            ])
            .await;

        assert_eq!(report.status("a"), Some(TaskStatus::Completed));
        assert_eq!(report.status("b"), Some(TaskStatus::Failed));
        assert_eq!(report.status("c"), Some(TaskStatus::Skipped));

        let events = events.lock();
        assert_eq!(
            events.last(),
            Some(&FanInEvent::Aborted {
                failed_task: "b".to_string(),
                skipped: 1,
            })
        );
        assert!(!events
            .iter()
            .any(|e| matches!(e, FanInEvent::Converged { .. })));
    }
}
