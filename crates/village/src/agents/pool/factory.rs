//! Worker Factory
//!
//! The construction collaborator used by the pool and the registry.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use crate::agents::types::AgentConfig;

/// Builds ready-to-use agent workers.
///
/// Implemented by the application layer; the pool never looks inside the
/// worker it gets back.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    type Worker: Send + Sync + 'static;

    /// Construct a worker of the given type
    async fn create(&self, kind: &str, config: Option<&AgentConfig>)
        -> anyhow::Result<Self::Worker>;
}

/// [`WorkerFactory`] backed by an async closure taking owned arguments.
pub struct FnWorkerFactory<F, W> {
    create: F,
    _worker: PhantomData<fn() -> W>,
}

impl<F, W> FnWorkerFactory<F, W> {
    pub fn new(create: F) -> Self {
        Self {
            create,
            _worker: PhantomData,
        }
    }
}

impl<F, W> fmt::Debug for FnWorkerFactory<F, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnWorkerFactory").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut, W> WorkerFactory for FnWorkerFactory<F, W>
where
    F: Fn(String, Option<AgentConfig>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<W>> + Send,
    W: Send + Sync + 'static,
{
    type Worker = W;

    async fn create(&self, kind: &str, config: Option<&AgentConfig>) -> anyhow::Result<W> {
        (self.create)(kind.to_string(), config.cloned()).await
    }
}

/// Shorthand for [`FnWorkerFactory::new`]
pub fn factory_fn<F, Fut, W>(create: F) -> FnWorkerFactory<F, W>
where
    F: Fn(String, Option<AgentConfig>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<W>> + Send,
    W: Send + Sync + 'static,
{
    FnWorkerFactory::new(create)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_factory_passes_arguments() {
        let factory = factory_fn(|kind: String, config: Option<AgentConfig>| async move {
            anyhow::Ok(format!(
                "{}:{}",
                kind,
                config.and_then(|c| c.model).unwrap_or_default()
            ))
        });

        let config = AgentConfig::new().with_model("haiku");
        let worker = factory.create("explore", Some(&config)).await.unwrap();
        assert_eq!(worker, "explore:haiku");

        let worker = factory.create("plan", None).await.unwrap();
        assert_eq!(worker, "plan:");
    }

    #[tokio::test]
    async fn test_fn_factory_propagates_errors() {
        let factory = factory_fn(|kind: String, _config: Option<AgentConfig>| async move {
            Err::<(), _>(anyhow::anyhow!("no backend for {}", kind))
        });

        let err = factory.create("explore", None).await.unwrap_err();
        assert_eq!(err.to_string(), "no backend for explore");
    }
}
