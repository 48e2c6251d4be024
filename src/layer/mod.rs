//! Pipeline stages.
//!
//! A layer owns the plugins of one capability and the fifo handles it reads
//! from or writes to. [`Layer::execute`] does one unit of work and returns;
//! the orchestrator owns the repeat loop.

pub mod emit;
pub mod intermediate;
pub mod manager;
pub mod origin;
pub mod terminal;

use std::{any::Any, future::Future, panic::AssertUnwindSafe, time::Duration};

use async_trait::async_trait;
use futures::FutureExt;
use sweep_plugin::{PluginError, Session};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    config::LayerKind,
    fifo::{Delivery, Dequeue, FifoError},
    logger::PipelineMetrics,
};

pub use emit::Emitter;
pub use intermediate::IntermediateLayer;
pub use manager::LayerManager;
pub use origin::OriginLayer;
pub use terminal::TerminalLayer;

#[derive(Error, Debug)]
pub enum LayerError {
    #[error("layer `{layer}`: {source}")]
    Fifo {
        layer: String,
        #[source]
        source: FifoError,
    },
}

/// Outcome of one [`Layer::execute`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Something was processed; poll again straight away.
    Worked,
    /// Nothing to do right now.
    Idle,
}

#[async_trait]
pub trait Layer: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> LayerKind;

    /// Ids of the plugins this layer drives, in the order it runs them.
    fn plugin_ids(&self) -> Vec<String>;

    /// One unit of work. Plugin failures are contained here; an `Err` means
    /// the layer itself cannot go on.
    async fn execute(&self, session: &Session) -> Result<Progress, LayerError>;

    /// Ask for no further scheduling. Idempotent.
    fn shutdown(&self);

    /// Cancelled once [`Layer::shutdown`] has been called.
    fn stop_token(&self) -> CancellationToken;

    fn is_shut_down(&self) -> bool {
        self.stop_token().is_cancelled()
    }
}

/// Shared runtime settings for every layer of a pipeline.
#[derive(Clone, Default)]
pub struct LayerContext {
    pub metrics: PipelineMetrics,
    pub plugin_timeout: Option<Duration>,
}

impl LayerContext {
    pub fn new(metrics: PipelineMetrics, plugin_timeout: Option<Duration>) -> Self {
        Self {
            metrics,
            plugin_timeout,
        }
    }
}

/// State every concrete layer carries.
pub(crate) struct LayerCore {
    name: String,
    context: LayerContext,
    stop: CancellationToken,
}

impl LayerCore {
    pub(crate) fn new(name: &str, context: LayerContext) -> Self {
        Self {
            name: name.to_string(),
            context,
            stop: CancellationToken::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn metrics(&self) -> &PipelineMetrics {
        &self.context.metrics
    }

    pub(crate) fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub(crate) fn shutdown(&self) {
        if !self.stop.is_cancelled() {
            self.stop.cancel();
            info!("layer `{}` shut down", self.name);
        }
    }

    pub(crate) fn fifo_error(&self, source: FifoError) -> LayerError {
        LayerError::Fifo {
            layer: self.name.clone(),
            source,
        }
    }

    /// One non-blocking fetch. Transient fifo errors read as an empty fifo;
    /// anything else stops the layer.
    pub(crate) async fn next_delivery(&self, reader: &dyn Dequeue) -> Result<Option<Delivery>, LayerError> {
        match reader.fetch().await {
            Ok(Some(delivery)) => {
                self.context.metrics.envelope_consumed(&self.name);
                Ok(Some(delivery))
            }
            Ok(None) => Ok(None),
            Err(e) if e.is_transient() => {
                warn!(layer = %self.name, "poll failed: {}", e);
                Ok(None)
            }
            Err(e) => Err(self.fifo_error(e)),
        }
    }

    /// Ack a delivery once every plugin has seen it. A failed ack only means
    /// the envelope may come round again.
    pub(crate) async fn settle(&self, delivery: Delivery) {
        if let Err(e) = delivery.ack().await {
            warn!(layer = %self.name, "ack failed, envelope may be redelivered: {}", e);
        }
    }

    /// Run one plugin call with failure containment: errors, panics and
    /// missed deadlines are logged with the plugin id and counted.
    pub(crate) async fn call_plugin<F>(&self, plugin: &str, action: &str, call: F) -> bool
    where
        F: Future<Output = Result<(), PluginError>> + Send,
    {
        let guarded = AssertUnwindSafe(call).catch_unwind();
        let outcome = match self.context.plugin_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(
                        layer = %self.name, %plugin,
                        "{} did not finish within {:?}", action, deadline
                    );
                    self.context.metrics.plugin_failed(&self.name);
                    return false;
                }
            },
            None => guarded.await,
        };
        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(layer = %self.name, %plugin, "{} failed: {}", action, e);
                self.context.metrics.plugin_failed(&self.name);
                false
            }
            Err(panic) => {
                error!(
                    layer = %self.name, %plugin,
                    "{} panicked: {}", action, panic_message(panic.as_ref())
                );
                self.context.metrics.plugin_failed(&self.name);
                false
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
