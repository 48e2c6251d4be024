use std::sync::Arc;

use async_trait::async_trait;
use sweep_plugin::{Session, TerminalPlugin};
use tokio_util::sync::CancellationToken;

use super::{Layer, LayerContext, LayerCore, LayerError, Progress};
use crate::{config::LayerKind, fifo::Dequeue};

/// Sink stage: same polling contract as the intermediate layer, no writer.
pub struct TerminalLayer {
    core: LayerCore,
    reader: Arc<dyn Dequeue>,
    plugins: Vec<Arc<dyn TerminalPlugin>>,
}

impl TerminalLayer {
    pub fn new(
        name: &str,
        reader: Arc<dyn Dequeue>,
        plugins: Vec<Arc<dyn TerminalPlugin>>,
        context: LayerContext,
    ) -> Self {
        Self {
            core: LayerCore::new(name, context),
            reader,
            plugins,
        }
    }
}

#[async_trait]
impl Layer for TerminalLayer {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Terminal
    }

    fn plugin_ids(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.id().to_string()).collect()
    }

    async fn execute(&self, _session: &Session) -> Result<Progress, LayerError> {
        if self.core.is_stopped() {
            return Ok(Progress::Idle);
        }
        let Some(delivery) = self.core.next_delivery(self.reader.as_ref()).await? else {
            return Ok(Progress::Idle);
        };
        for plugin in &self.plugins {
            self.core
                .call_plugin(plugin.id(), "accept", plugin.accept(delivery.envelope()))
                .await;
        }
        self.core.settle(delivery).await;
        Ok(Progress::Worked)
    }

    fn shutdown(&self) {
        self.core.shutdown();
    }

    fn stop_token(&self) -> CancellationToken {
        self.core.stop_token()
    }
}
