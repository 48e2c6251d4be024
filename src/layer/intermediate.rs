use std::sync::Arc;

use async_trait::async_trait;
use sweep_plugin::{IntermediatePlugin, InterestPattern, Session};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{Emitter, Layer, LayerContext, LayerCore, LayerError, Progress};
use crate::{
    config::LayerKind,
    fifo::{Dequeue, Queue},
};

struct Stage {
    plugin: Arc<dyn IntermediatePlugin>,
    interests: Vec<InterestPattern>,
    emit: Emitter,
}

impl Stage {
    fn wants(&self, kind: &str) -> bool {
        self.interests.iter().any(|p| p.matches(kind))
    }
}

/// Polls its reader once per `execute` and hands the envelope to every
/// interested plugin, which may re-emit onto the writer.
pub struct IntermediateLayer {
    core: LayerCore,
    reader: Arc<dyn Dequeue>,
    stages: Vec<Stage>,
}

impl IntermediateLayer {
    pub fn new(
        name: &str,
        reader: Arc<dyn Dequeue>,
        writer: Arc<dyn Queue>,
        plugins: Vec<Arc<dyn IntermediatePlugin>>,
        context: LayerContext,
    ) -> Self {
        // Interest patterns are fixed once a plugin is initialised.
        let stages = plugins
            .into_iter()
            .map(|plugin| Stage {
                interests: plugin.accepts(),
                emit: Emitter::new(name, plugin.id(), Arc::clone(&writer), context.metrics.clone()),
                plugin,
            })
            .collect();
        Self {
            core: LayerCore::new(name, context),
            reader,
            stages,
        }
    }
}

#[async_trait]
impl Layer for IntermediateLayer {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Intermediate
    }

    fn plugin_ids(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.plugin.id().to_string()).collect()
    }

    async fn execute(&self, _session: &Session) -> Result<Progress, LayerError> {
        if self.core.is_stopped() {
            return Ok(Progress::Idle);
        }
        let Some(delivery) = self.core.next_delivery(self.reader.as_ref()).await? else {
            return Ok(Progress::Idle);
        };
        let envelope = delivery.envelope();

        for stage in &self.stages {
            if !stage.wants(envelope.kind()) {
                trace!(
                    layer = %self.core.name(), plugin = %stage.plugin.id(),
                    "not interested in `{}`", envelope.kind()
                );
                continue;
            }
            self.core
                .call_plugin(stage.plugin.id(), "accept", stage.plugin.accept(envelope, &stage.emit))
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
