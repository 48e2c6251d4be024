use std::sync::Arc;

use async_trait::async_trait;
use sweep_plugin::{Emit, EmitError, Envelope};
use tracing::{trace, warn};

use crate::{fifo::Queue, logger::PipelineMetrics};

/// The `emit` handle a layer gives one of its plugins.
///
/// Stamps the plugin's id onto the envelope's provenance and pushes it onto
/// the layer's writer queue. A rejected envelope is logged and dropped.
pub struct Emitter {
    layer: String,
    plugin_id: String,
    writer: Arc<dyn Queue>,
    metrics: PipelineMetrics,
}

impl Emitter {
    pub fn new(layer: &str, plugin_id: &str, writer: Arc<dyn Queue>, metrics: PipelineMetrics) -> Self {
        Self {
            layer: layer.to_string(),
            plugin_id: plugin_id.to_string(),
            writer,
            metrics,
        }
    }
}

#[async_trait]
impl Emit for Emitter {
    async fn emit(&self, envelope: Envelope) -> Result<(), EmitError> {
        let stamped = envelope.with_hop(&self.plugin_id);
        match self.writer.add(stamped).await {
            Ok(()) => {
                trace!(layer = %self.layer, plugin = %self.plugin_id, "emitted onto `{}`", self.writer.name());
                self.metrics.envelope_emitted(&self.layer);
                Ok(())
            }
            Err(e) => {
                warn!(layer = %self.layer, plugin = %self.plugin_id, "dropping envelope: {}", e);
                self.metrics.emit_failed(&self.layer);
                Err(e.into())
            }
        }
    }
}
