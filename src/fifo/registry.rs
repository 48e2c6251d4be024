use std::{collections::BTreeMap, sync::Arc};

use dashmap::DashMap;
use tracing::{debug, info};

use super::{Dequeue, FifoBackend, FifoError, LocalFifo, NatsFifo, Queue};
use crate::config::{BackendType, FifoConfig};

/// Resolves fifo names to shared instances.
///
/// The first resolution of a name builds its backend; every later one, for
/// either end, returns that same instance. Names with no section get a local
/// fifo, so `default` and ad-hoc names need no configuration.
pub struct FifoRegistry {
    configs: BTreeMap<String, FifoConfig>,
    instances: DashMap<String, Arc<dyn FifoBackend>>,
}

impl FifoRegistry {
    pub fn new(configs: BTreeMap<String, FifoConfig>) -> Self {
        Self {
            configs,
            instances: DashMap::new(),
        }
    }

    pub fn config_for(&self, name: &str) -> FifoConfig {
        self.configs.get(name).cloned().unwrap_or_default()
    }

    pub async fn resolve(&self, name: &str) -> Result<Arc<dyn FifoBackend>, FifoError> {
        if let Some(existing) = self.instances.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        let config = self.config_for(name);
        if !config.enabled {
            return Err(FifoError::Disabled {
                name: name.to_string(),
            });
        }
        let built: Arc<dyn FifoBackend> = match config.backend {
            BackendType::Local => {
                debug!("creating local fifo `{}`", name);
                Arc::new(LocalFifo::new(name))
            }
            BackendType::Distributed => Arc::new(NatsFifo::connect(name, &config).await?),
        };

        // Two layers may race to build the same fifo; the first insert wins.
        let shared = Arc::clone(
            self.instances
                .entry(name.to_string())
                .or_insert(built)
                .value(),
        );
        info!("fifo `{}` resolved ({})", name, shared.backend());
        Ok(shared)
    }

    /// Producer view of `name`.
    pub async fn resolve_queue(&self, name: &str) -> Result<Arc<dyn Queue>, FifoError> {
        Ok(self.resolve(name).await?.as_queue())
    }

    /// Consumer view of `name`, attached and ready to poll.
    pub async fn resolve_dequeue(&self, name: &str) -> Result<Arc<dyn Dequeue>, FifoError> {
        let dequeue = self.resolve(name).await?.as_dequeue();
        dequeue.attach().await?;
        Ok(dequeue)
    }

    /// Names resolved so far.
    pub fn resolved(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
