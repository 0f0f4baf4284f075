//! Agent Pool
//!
//! Manages a bounded pool of reusable agent workers keyed by type, with
//! acquire/release semantics and periodic idle eviction.
//!
//! # Invariants
//! - An in-use worker is never handed out by `acquire`
//! - Live workers never exceed `max_size`, including ones under construction
//! - Eviction never drops the live count below `min_size`

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::factory::WorkerFactory;
use crate::agents::types::AgentConfig;
use crate::config::duration_ms;

/// Result type alias for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Error types for pool operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Agent pool exhausted (max: {max_size})")]
    Exhausted { max_size: usize },
    #[error("Pool is shutting down")]
    ShuttingDown,
    #[error("Failed to construct agent of type '{kind}': {reason}")]
    Construction { kind: String, reason: String },
    #[error("Invalid pool config: {0}")]
    InvalidConfig(String),
    #[error("Agent pool requires a running Tokio runtime")]
    NoRuntime,
}

/// Pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    /// Eviction floor
    pub min_size: usize,
    /// Upper bound on live workers
    pub max_size: usize,
    /// Idle time after which a worker may be evicted
    #[serde(rename = "idleTimeoutMs", with = "duration_ms")]
    pub idle_timeout: Duration,
    /// How often the background sweep runs
    #[serde(rename = "evictIntervalMs", with = "duration_ms")]
    pub evict_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 10,
            idle_timeout: Duration::from_secs(5 * 60),
            evict_interval: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    pub fn new(min_size: usize, max_size: usize, idle_timeout: Duration) -> Self {
        Self {
            min_size,
            max_size,
            idle_timeout,
            ..Default::default()
        }
    }

    pub fn with_evict_interval(mut self, interval: Duration) -> Self {
        self.evict_interval = interval;
        self
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.max_size == 0 {
            return Err(PoolError::InvalidConfig(
                "max_size must be at least 1".to_string(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(PoolError::InvalidConfig(format!(
                "min_size ({}) exceeds max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.evict_interval.is_zero() {
            return Err(PoolError::InvalidConfig(
                "evict_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A worker handed out by the pool.
///
/// Cloning is cheap and keeps the same identity; give the handle back
/// with [`AgentPool::release`] when done.
pub struct PooledAgent<W> {
    id: String,
    kind: String,
    worker: Arc<W>,
}

impl<W> PooledAgent<W> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn worker(&self) -> &Arc<W> {
        &self.worker
    }

    /// True when both handles refer to the same pooled worker
    pub fn same_as(&self, other: &PooledAgent<W>) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.worker, &other.worker)
    }
}

impl<W> Clone for PooledAgent<W> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            kind: self.kind.clone(),
            worker: Arc::clone(&self.worker),
        }
    }
}

impl<W> Deref for PooledAgent<W> {
    type Target = W;

    fn deref(&self) -> &W {
        &self.worker
    }
}

impl<W> fmt::Debug for PooledAgent<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledAgent")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Snapshot of one pooled worker's bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PooledAgentInfo {
    pub id: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub in_use: bool,
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub in_use: usize,
    pub max_size: usize,
    /// Percentage of live workers currently in use
    pub utilization_rate: f64,
}

struct PoolEntry<W> {
    agent: PooledAgent<W>,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
    in_use: bool,
}

struct PoolState<W> {
    entries: IndexMap<String, PoolEntry<W>>,
    /// Slots held by constructions still in flight
    reserved: usize,
    shut_down: bool,
}

impl<W> PoolState<W> {
    fn occupied(&self) -> usize {
        self.entries.len() + self.reserved
    }
}

struct PoolShared<W> {
    config: PoolConfig,
    state: Mutex<PoolState<W>>,
}

impl<W> PoolShared<W> {
    fn evict_idle(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock();

        let expired: Vec<String> = state
            .entries
            .values()
            .filter(|e| {
                !e.in_use
                    && (now - e.last_used).to_std().unwrap_or(Duration::ZERO)
                        > self.config.idle_timeout
            })
            .map(|e| e.agent.id.clone())
            .collect();

        let mut evicted = 0;
        for id in expired {
            if state.entries.len() <= self.config.min_size {
                break;
            }
            if let Some(entry) = state.entries.shift_remove(&id) {
                info!(agent_id = %id, kind = %entry.agent.kind, "evicted idle agent");
                evicted += 1;
            }
        }
        evicted
    }
}

/// A capacity slot held while a worker is being constructed.
///
/// Dropping it without [`commit`](Self::commit) gives the slot back, so a
/// cancelled or failed construction never leaks capacity.
struct Reservation<W> {
    shared: Arc<PoolShared<W>>,
    armed: bool,
}

impl<W> Reservation<W> {
    fn commit(mut self, state: &mut PoolState<W>) {
        state.reserved -= 1;
        self.armed = false;
    }
}

impl<W> Drop for Reservation<W> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.state.lock().reserved -= 1;
        }
    }
}

/// Agent Pool for managing reusable agent workers
///
/// Must be created inside a Tokio runtime: construction starts the
/// background eviction loop, and fails with [`PoolError::NoRuntime`]
/// otherwise.
pub struct AgentPool<F: WorkerFactory> {
    shared: Arc<PoolShared<F::Worker>>,
    factory: Arc<F>,
    shutdown: CancellationToken,
}

impl<F: WorkerFactory> AgentPool<F> {
    pub fn new(config: PoolConfig, factory: F) -> PoolResult<Self> {
        Self::with_shared_factory(config, Arc::new(factory))
    }

    pub fn with_shared_factory(config: PoolConfig, factory: Arc<F>) -> PoolResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;
        let shared = Arc::new(PoolShared {
            config,
            state: Mutex::new(PoolState {
                entries: IndexMap::new(),
                reserved: 0,
                shut_down: false,
            }),
        });
        let shutdown = CancellationToken::new();
        spawn_evictor(&runtime, Arc::clone(&shared), shutdown.clone());

        Ok(Self {
            shared,
            factory,
            shutdown,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().shut_down
    }

    /// Hand out an idle worker of `kind`, or construct a new one if the
    /// pool has room.
    pub async fn acquire(
        &self,
        kind: &str,
        config: Option<&AgentConfig>,
    ) -> PoolResult<PooledAgent<F::Worker>> {
        let reservation = {
            let mut state = self.shared.state.lock();
            if state.shut_down {
                return Err(PoolError::ShuttingDown);
            }

            if let Some(entry) = state
                .entries
                .values_mut()
                .find(|e| !e.in_use && e.agent.kind == kind)
            {
                entry.in_use = true;
                entry.last_used = Utc::now();
                debug!(agent_id = %entry.agent.id, kind, "reusing idle agent");
                return Ok(entry.agent.clone());
            }

            if state.occupied() >= self.shared.config.max_size {
                warn!(kind, max_size = self.shared.config.max_size, "agent pool exhausted");
                return Err(PoolError::Exhausted {
                    max_size: self.shared.config.max_size,
                });
            }
            self.reserve(&mut state)
        };

        self.construct(kind, config, reservation, true).await
    }

    /// Give a worker back to the idle set.
    ///
    /// Unknown handles are ignored; releasing an idle worker again is a
    /// no-op and does not refresh its idle clock.
    pub fn release(&self, agent: &PooledAgent<F::Worker>) {
        let mut state = self.shared.state.lock();
        match state.entries.get_mut(&agent.id) {
            Some(entry) if entry.in_use => {
                entry.in_use = false;
                entry.last_used = Utc::now();
                debug!(agent_id = %agent.id, kind = %agent.kind, "agent released");
            }
            Some(_) => {
                debug!(agent_id = %agent.id, "agent already idle");
            }
            None => {
                warn!(agent_id = %agent.id, kind = %agent.kind, "release of unknown agent ignored");
            }
        }
    }

    /// Eagerly construct `count` idle workers of `kind`, concurrently.
    ///
    /// Capacity for the whole batch is reserved up front; if it does not
    /// fit, nothing is constructed.
    pub async fn warm_up(
        &self,
        kind: &str,
        count: usize,
        config: Option<&AgentConfig>,
    ) -> PoolResult<()> {
        let reservations: Vec<_> = {
            let mut state = self.shared.state.lock();
            if state.shut_down {
                return Err(PoolError::ShuttingDown);
            }
            if state.occupied() + count > self.shared.config.max_size {
                return Err(PoolError::Exhausted {
                    max_size: self.shared.config.max_size,
                });
            }
            (0..count).map(|_| self.reserve(&mut state)).collect()
        };

        info!(kind, count, "warming up agents");
        let results = futures::future::join_all(
            reservations
                .into_iter()
                .map(|reservation| self.construct(kind, config, reservation, false)),
        )
        .await;

        results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        let total = state.entries.len();
        let in_use = state.entries.values().filter(|e| e.in_use).count();
        PoolStats {
            total,
            available: total - in_use,
            in_use,
            max_size: self.shared.config.max_size,
            utilization_rate: if total > 0 {
                in_use as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }

    pub fn workers(&self) -> Vec<PooledAgentInfo> {
        self.shared
            .state
            .lock()
            .entries
            .values()
            .map(|e| PooledAgentInfo {
                id: e.agent.id.clone(),
                kind: e.agent.kind.clone(),
                created_at: e.created_at,
                last_used: e.last_used,
                in_use: e.in_use,
            })
            .collect()
    }

    /// Run one eviction sweep now; returns the number of workers removed.
    pub fn evict_idle(&self) -> usize {
        self.shared.evict_idle()
    }

    /// Stop the eviction loop and drop every worker immediately.
    pub fn destroy(&self) {
        self.shutdown.cancel();
        let mut state = self.shared.state.lock();
        state.shut_down = true;
        let dropped = state.entries.len();
        state.entries.clear();
        info!(dropped, "agent pool destroyed");
    }

    fn reserve(&self, state: &mut PoolState<F::Worker>) -> Reservation<F::Worker> {
        state.reserved += 1;
        Reservation {
            shared: Arc::clone(&self.shared),
            armed: true,
        }
    }

    async fn construct(
        &self,
        kind: &str,
        config: Option<&AgentConfig>,
        reservation: Reservation<F::Worker>,
        in_use: bool,
    ) -> PoolResult<PooledAgent<F::Worker>> {
        let created = self.factory.create(kind, config).await;

        let mut state = self.shared.state.lock();
        reservation.commit(&mut state);

        let worker = created.map_err(|e| {
            warn!(kind, error = %e, "agent construction failed");
            PoolError::Construction {
                kind: kind.to_string(),
                reason: format!("{:#}", e),
            }
        })?;
        if state.shut_down {
            return Err(PoolError::ShuttingDown);
        }

        let now = Utc::now();
        let agent = PooledAgent {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            worker: Arc::new(worker),
        };
        state.entries.insert(
            agent.id.clone(),
            PoolEntry {
                agent: agent.clone(),
                created_at: now,
                last_used: now,
                in_use,
            },
        );
        debug!(agent_id = %agent.id, kind, in_use, total = state.entries.len(), "agent constructed");
        Ok(agent)
    }
}

impl<F: WorkerFactory> Drop for AgentPool<F> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn spawn_evictor<W>(runtime: &Handle, shared: Arc<PoolShared<W>>, shutdown: CancellationToken)
where
    W: Send + Sync + 'static,
{
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(shared.config.evict_interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = shared.evict_idle();
                    if evicted > 0 {
                        debug!(evicted, "idle sweep finished");
                    }
                }
            }
        }
    });
}
