// src/apps.rs
use std::sync::Arc;

use sweep_plugin::{Capability, PluginRegistry};
use thiserror::Error;
use tracing::info;

use crate::{
    config::{ConfigError, PipelineConfig},
    fifo::FifoRegistry,
    layer::{LayerContext, LayerError, LayerManager},
    logger::PipelineMetrics,
    orchestrator::{Orchestrator, OrchestratorError, ScanReport},
    plugin::{LoadError, PluginManager},
    report::ReportDispatcher,
};

/// Capabilities a pipeline run drives.
pub const PIPELINE_CAPABILITIES: [Capability; 3] =
    [Capability::Origin, Capability::Intermediate, Capability::Terminal];

/// Anything that stops a pipeline from being assembled.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Layer(#[from] LayerError),
}

/// A fully wired pipeline, ready to scan.
pub struct App {
    fifos: Arc<FifoRegistry>,
    plugins: Arc<PluginManager>,
    orchestrator: Arc<Orchestrator>,
    metrics: PipelineMetrics,
}

impl App {
    /// Bootstraps a pipeline:
    ///   - validates the config
    ///   - loads and initialises the configured plugins
    ///   - resolves every fifo the enabled layers name
    ///   - builds the layers and hands them to an orchestrator
    ///
    /// Every failure here is fatal and happens before any layer runs.
    pub async fn bootstrap(config: &PipelineConfig, registry: PluginRegistry) -> Result<Self, StartupError> {
        config.validate()?;
        let metrics = PipelineMetrics::new();

        let plugins = Arc::new(PluginManager::load(registry, &config.plugins, &PIPELINE_CAPABILITIES).await?);
        let fifos = Arc::new(FifoRegistry::new(config.fifos.clone()));
        let context = LayerContext::new(metrics.clone(), config.engine.plugin_timeout());
        let layers = match LayerManager::build(config, &fifos, &plugins, &context).await {
            Ok(layers) => layers,
            Err(e) => {
                // Plugins are already initialised; give them a chance to flush.
                plugins.shutdown_all().await;
                return Err(e.into());
            }
        };
        info!(
            "pipeline ready: {} layers, {} plugins, fifos [{}]",
            layers.len(),
            plugins.len(),
            fifos.resolved().join(", ")
        );

        let orchestrator = Arc::new(Orchestrator::new(
            layers.into_layers(),
            Arc::clone(&plugins),
            config.engine.clone(),
            metrics.clone(),
        ));
        Ok(Self {
            fifos,
            plugins,
            orchestrator,
            metrics,
        })
    }

    pub async fn scan(&self) -> Result<ScanReport, OrchestratorError> {
        self.orchestrator.scan().await
    }

    /// Handle for stopping a running scan from elsewhere, e.g. a signal handler.
    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        Arc::clone(&self.orchestrator)
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    pub fn fifos(&self) -> &FifoRegistry {
        &self.fifos
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }
}

/// Load only the policy-output plugins and wrap them in a dispatcher.
pub async fn report_dispatcher(
    config: &PipelineConfig,
    registry: PluginRegistry,
) -> Result<(PluginManager, ReportDispatcher), LoadError> {
    let plugins = PluginManager::load(registry, &config.plugins, &[Capability::PolicyOutput]).await?;
    let dispatcher = ReportDispatcher::new(&plugins);
    Ok((plugins, dispatcher))
}
