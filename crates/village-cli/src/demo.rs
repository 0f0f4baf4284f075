//! `village demo`: fans simulated agent calls out over a pooled backend
//! and prints what converged.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use village::agents::pool::PooledAgentInfo;
use village::{
    AgentConfig, AgentPool, AgentRegistry, FanInReport, Orchestrator, PoolStats, Settings, Task,
    TaskPriority, WorkerFactory,
};

const WORKER_KIND: &str = "worker";
const COORDINATOR_ID: &str = "coordinator";
const DEFAULT_MODEL: &str = "sonnet";

#[derive(Debug, Clone, Args)]
pub struct DemoArgs {
    /// Number of required tasks
    #[arg(long, default_value_t = 3)]
    pub required: usize,

    /// Number of optional tasks
    #[arg(long, default_value_t = 2)]
    pub optional: usize,

    /// Make the first required task fail
    #[arg(long)]
    pub fail_required: bool,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

/// Stand-in for a model-backed agent
#[derive(Debug)]
pub struct SimulatedAgent {
    model: String,
}

impl SimulatedAgent {
    async fn query(&self, prompt: &str, latency: Duration, fail: bool) -> Result<String> {
        tokio::time::sleep(latency).await;
        if fail {
            anyhow::bail!("{} refused to answer '{}'", self.model, prompt);
        }
        Ok(format!("[{}] {}", self.model, prompt))
    }
}

#[derive(Debug, Default)]
pub struct SimulatedFactory;

#[async_trait]
impl WorkerFactory for SimulatedFactory {
    type Worker = SimulatedAgent;

    async fn create(&self, _kind: &str, config: Option<&AgentConfig>) -> Result<SimulatedAgent> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(SimulatedAgent {
            model: config
                .and_then(|c| c.model.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }
}

pub struct DemoOutcome {
    pub report: FanInReport<String>,
    pub pool: PoolStats,
    pub workers: Vec<PooledAgentInfo>,
    pub current_agent: Option<String>,
}

pub async fn run(settings: &Settings, args: &DemoArgs) -> Result<()> {
    let outcome = execute(settings, args).await?;

    if args.json {
        let doc = json!({
            "currentAgent": outcome.current_agent,
            "report": outcome.report,
            "pool": outcome.pool,
            "workers": outcome.workers,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        print_text(&outcome);
    }
    Ok(())
}

pub async fn execute(settings: &Settings, args: &DemoArgs) -> Result<DemoOutcome> {
    let factory = Arc::new(SimulatedFactory);
    let pool = Arc::new(
        AgentPool::with_shared_factory(settings.pool.clone(), Arc::clone(&factory))
            .context("invalid pool configuration")?,
    );
    let registry = AgentRegistry::with_shared_factory(factory);

    registry
        .create(COORDINATOR_ID, settings.agent.clone())
        .await
        .context("failed to create coordinator agent")?;

    let warm = settings.pool.min_size.min(args.required);
    if warm > 0 {
        pool.warm_up(WORKER_KIND, warm, Some(&settings.agent))
            .await
            .context("failed to warm up pool")?;
    }

    let mut tasks = Vec::with_capacity(args.required + args.optional);
    for i in 0..args.required {
        let latency = Duration::from_millis(50 + 40 * i as u64);
        let fail = args.fail_required && i == 0;
        tasks.push(pooled_query(
            &pool,
            &settings.agent,
            format!("required_{}", i),
            TaskPriority::Required,
            format!("summarize source {}", i),
            latency,
            fail,
        ));
    }
    for i in 0..args.optional {
        let latency = Duration::from_millis(120 + 150 * i as u64);
        tasks.push(pooled_query(
            &pool,
            &settings.agent,
            format!("optional_{}", i),
            TaskPriority::Optional,
            format!("enrich with extra {}", i),
            latency,
            false,
        ));
    }

    info!(tasks = tasks.len(), "running demo fan-in");
    let report = Orchestrator::new(settings.orchestrator.clone())
        .run(tasks)
        .await;

    let outcome = DemoOutcome {
        report,
        pool: pool.stats(),
        workers: pool.workers(),
        current_agent: registry.current_id(),
    };

    pool.destroy();
    registry.destroy_all();
    Ok(outcome)
}

fn pooled_query(
    pool: &Arc<AgentPool<SimulatedFactory>>,
    agent_config: &AgentConfig,
    name: String,
    priority: TaskPriority,
    prompt: String,
    latency: Duration,
    fail: bool,
) -> Task<String> {
    let pool = Arc::clone(pool);
    let agent_config = agent_config.clone();
    Task::new(name, priority, move || async move {
        let agent = pool.acquire(WORKER_KIND, Some(&agent_config)).await?;
        let answer = agent.query(&prompt, latency, fail).await;
        pool.release(&agent);
        answer
    })
}

fn print_text(outcome: &DemoOutcome) {
    let report = &outcome.report;
    println!(
        "Fan-in finished in {}ms: {} completed, {} failed, {} skipped",
        report.total_duration.as_millis(),
        report.completed(),
        report.failed(),
        report.skipped()
    );
    for result in report.iter() {
        let detail = match (&result.value, &result.error) {
            (Some(value), _) => value.as_str(),
            (None, Some(error)) => error.as_str(),
            (None, None) => "-",
        };
        println!(
            "  {:<8} {:<12} {:<9} {:>6}ms  {}",
            result.priority.to_string(),
            result.name,
            result.status.to_string(),
            result.duration.as_millis(),
            detail
        );
    }

    let stats = &outcome.pool;
    println!(
        "Pool: total={} available={} in_use={} max={} utilization={:.1}%",
        stats.total, stats.available, stats.in_use, stats.max_size, stats.utilization_rate
    );
    if let Some(current) = &outcome.current_agent {
        println!("Current agent: {}", current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use village::TaskStatus;

    fn args(required: usize, optional: usize, fail_required: bool) -> DemoArgs {
        DemoArgs {
            required,
            optional,
            fail_required,
            json: false,
        }
    }

    #[tokio::test]
    async fn test_demo_converges_on_required_tasks() {
        let settings = Settings::default();

        let outcome = execute(&settings, &args(3, 2, false)).await.unwrap();

        assert_eq!(outcome.report.len(), 5);
        assert!(outcome.report.all_required_completed());
        assert_eq!(
            outcome.report.get("required_0").unwrap().value.as_deref(),
            Some("[sonnet] summarize source 0")
        );
        // optional_1 needs 270ms, longer than the slowest required task
        assert_eq!(outcome.report.status("optional_1"), Some(TaskStatus::Skipped));
        assert_eq!(outcome.current_agent.as_deref(), Some(COORDINATOR_ID));
        assert!(outcome.pool.total <= settings.pool.max_size);
    }

    #[tokio::test]
    async fn test_demo_aborts_on_required_failure() {
        let mut settings = Settings::default();
        settings.agent = AgentConfig::new().with_model("haiku");

        let outcome = execute(&settings, &args(3, 1, true)).await.unwrap();

        let failed = outcome.report.get("required_0").unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(
            failed.error.as_deref(),
            Some("haiku refused to answer 'summarize source 0'")
        );
        assert_eq!(outcome.report.skipped(), 3);
    }

    #[tokio::test]
    async fn test_demo_rejects_invalid_pool() {
        let mut settings = Settings::default();
        settings.pool.max_size = 0;

        assert!(execute(&settings, &args(1, 0, false)).await.is_err());
    }
}
