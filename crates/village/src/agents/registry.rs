//! Agent Registry
//!
//! Keeps named, long-lived agents with a notion of the "current" agent and
//! publishes lifecycle events to subscribers.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::pool::WorkerFactory;
use super::types::AgentConfig;

/// Worker type tag used by [`AgentRegistry::create`]
pub const DEFAULT_AGENT_KIND: &str = "default";

const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Agent with id '{0}' already exists")]
    AlreadyExists(String),

    #[error("Agent with id '{0}' does not exist")]
    NotFound(String),

    #[error("Failed to construct agent: {0}")]
    Construction(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RegistryEvent {
    Created { id: String, config: AgentConfig },
    Destroyed { id: String },
    Switched { id: String },
}

/// Metadata for one managed agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedAgentInfo {
    pub id: String,
    pub kind: String,
    pub config: AgentConfig,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

struct ManagedAgent<W> {
    worker: Arc<W>,
    info: ManagedAgentInfo,
}

struct RegistryState<W> {
    agents: IndexMap<String, ManagedAgent<W>>,
    current: Option<String>,
}

pub struct AgentRegistry<F: WorkerFactory> {
    factory: Arc<F>,
    state: Mutex<RegistryState<F::Worker>>,
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl<F: WorkerFactory> AgentRegistry<F> {
    pub fn new(factory: F) -> Self {
        Self::with_shared_factory(Arc::new(factory))
    }

    /// Build a registry sharing its factory with a pool
    pub fn with_shared_factory(factory: Arc<F>) -> Self {
        let (event_sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            factory,
            state: Mutex::new(RegistryState {
                agents: IndexMap::new(),
                current: None,
            }),
            event_sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Create an agent of [`DEFAULT_AGENT_KIND`] under `id`.
    pub async fn create(&self, id: &str, config: AgentConfig) -> RegistryResult<Arc<F::Worker>> {
        self.create_with_kind(id, DEFAULT_AGENT_KIND, config).await
    }

    /// Create an agent under `id`.
    ///
    /// The first agent created becomes the current one.
    pub async fn create_with_kind(
        &self,
        id: &str,
        kind: &str,
        config: AgentConfig,
    ) -> RegistryResult<Arc<F::Worker>> {
        if self.contains(id) {
            return Err(RegistryError::AlreadyExists(id.to_string()));
        }

        let worker = self
            .factory
            .create(kind, Some(&config))
            .await
            .map(Arc::new)
            .map_err(|e| RegistryError::Construction(format!("{:#}", e)))?;

        let mut events = Vec::with_capacity(2);
        {
            let mut state = self.state.lock();
            // a concurrent create may have claimed the id while we were constructing
            if state.agents.contains_key(id) {
                return Err(RegistryError::AlreadyExists(id.to_string()));
            }

            let now = Utc::now();
            state.agents.insert(
                id.to_string(),
                ManagedAgent {
                    worker: Arc::clone(&worker),
                    info: ManagedAgentInfo {
                        id: id.to_string(),
                        kind: kind.to_string(),
                        config: config.clone(),
                        created_at: now,
                        last_used: now,
                    },
                },
            );
            events.push(RegistryEvent::Created {
                id: id.to_string(),
                config,
            });

            if state.current.is_none() {
                state.current = Some(id.to_string());
                events.push(RegistryEvent::Switched { id: id.to_string() });
            }
        }

        info!(agent_id = id, kind, "agent created");
        self.emit_all(events);
        Ok(worker)
    }

    /// Look up an agent, refreshing its last-used time.
    pub fn get(&self, id: &str) -> Option<Arc<F::Worker>> {
        let mut state = self.state.lock();
        state.agents.get_mut(id).map(|managed| {
            managed.info.last_used = Utc::now();
            Arc::clone(&managed.worker)
        })
    }

    pub fn current(&self) -> Option<Arc<F::Worker>> {
        let id = self.current_id()?;
        self.get(&id)
    }

    pub fn current_id(&self) -> Option<String> {
        self.state.lock().current.clone()
    }

    pub fn switch(&self, id: &str) -> RegistryResult<()> {
        {
            let mut state = self.state.lock();
            let managed = state
                .agents
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            managed.info.last_used = Utc::now();
            state.current = Some(id.to_string());
        }

        debug!(agent_id = id, "switched current agent");
        self.emit(RegistryEvent::Switched { id: id.to_string() });
        Ok(())
    }

    /// Remove an agent.
    ///
    /// If it was the current agent, the oldest remaining agent takes over.
    pub fn destroy(&self, id: &str) -> RegistryResult<()> {
        let mut events = Vec::with_capacity(2);
        {
            let mut state = self.state.lock();
            if state.agents.shift_remove(id).is_none() {
                return Err(RegistryError::NotFound(id.to_string()));
            }
            events.push(RegistryEvent::Destroyed { id: id.to_string() });

            if state.current.as_deref() == Some(id) {
                state.current = state.agents.keys().next().cloned();
                if let Some(next) = &state.current {
                    events.push(RegistryEvent::Switched { id: next.clone() });
                }
            }
        }

        info!(agent_id = id, "agent destroyed");
        self.emit_all(events);
        Ok(())
    }

    /// Metadata for every agent, in creation order
    pub fn list(&self) -> Vec<ManagedAgentInfo> {
        self.state
            .lock()
            .agents
            .values()
            .map(|m| m.info.clone())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().agents.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn destroy_all(&self) {
        let ids: Vec<String> = self.state.lock().agents.keys().cloned().collect();
        for id in ids {
            // another caller may have removed it already
            let _ = self.destroy(&id);
        }
    }

    fn emit(&self, event: RegistryEvent) {
        // no subscribers is fine
        let _ = self.event_sender.send(event);
    }

    fn emit_all(&self, events: Vec<RegistryEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}
