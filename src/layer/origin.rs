use std::sync::Arc;

use async_trait::async_trait;
use sweep_plugin::{OriginPlugin, Session};
use tracing::info;

use super::{Emitter, Layer, LayerContext, LayerCore, LayerError, Progress};
use crate::{config::LayerKind, fifo::Queue};

/// Runs every origin plugin's `discover` once per pass, in order.
pub struct OriginLayer {
    core: LayerCore,
    plugins: Vec<(Arc<dyn OriginPlugin>, Emitter)>,
}

impl OriginLayer {
    pub fn new(
        name: &str,
        writer: Arc<dyn Queue>,
        plugins: Vec<Arc<dyn OriginPlugin>>,
        context: LayerContext,
    ) -> Self {
        let plugins = plugins
            .into_iter()
            .map(|p| {
                let emit = Emitter::new(name, p.id(), Arc::clone(&writer), context.metrics.clone());
                (p, emit)
            })
            .collect();
        Self {
            core: LayerCore::new(name, context),
            plugins,
        }
    }
}

#[async_trait]
impl Layer for OriginLayer {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Origin
    }

    fn plugin_ids(&self) -> Vec<String> {
        self.plugins.iter().map(|(p, _)| p.id().to_string()).collect()
    }

    /// One full enumeration sweep. A failing plugin does not stop the others.
    async fn execute(&self, session: &Session) -> Result<Progress, LayerError> {
        if self.core.is_stopped() {
            return Ok(Progress::Idle);
        }
        let mut failed = 0;
        for (plugin, emit) in &self.plugins {
            if !self
                .core
                .call_plugin(plugin.id(), "discover", plugin.discover(session, emit))
                .await
            {
                failed += 1;
            }
        }
        info!(
            "layer `{}` finished discovery: {} plugins, {} failed",
            self.core.name(),
            self.plugins.len(),
            failed
        );
        Ok(Progress::Worked)
    }

    fn shutdown(&self) {
        self.core.shutdown();
    }

    fn stop_token(&self) -> tokio_util::sync::CancellationToken {
        self.core.stop_token()
    }
}
