use std::{collections::BTreeMap, sync::Arc};

use tracing::{info, warn};

use super::{IntermediateLayer, Layer, LayerContext, LayerError, OriginLayer, TerminalLayer};
use crate::{
    config::{DEFAULT_FIFO, LayerConfig, LayerKind, PipelineConfig},
    fifo::FifoRegistry,
    plugin::PluginManager,
};

/// The enabled layers of a pipeline, wired to their fifos and plugins.
pub struct LayerManager {
    layers: BTreeMap<String, Arc<dyn Layer>>,
}

impl LayerManager {
    /// Build one layer per enabled `layers` entry.
    ///
    /// A layer's plugins are the configured ids, in configured order, that
    /// were loaded and implement the layer's capability. A layer left with no
    /// plugins is still built.
    pub async fn build(
        config: &PipelineConfig,
        fifos: &FifoRegistry,
        plugins: &PluginManager,
        context: &LayerContext,
    ) -> Result<Self, LayerError> {
        let mut layers: BTreeMap<String, Arc<dyn Layer>> = BTreeMap::new();
        for (name, layer_config) in config.enabled_layers() {
            let layer = Self::build_one(name, layer_config, fifos, plugins, context.clone()).await?;

            let resolved = layer.plugin_ids();
            let configured = layer_config.plugin_ids();
            for id in configured.iter().filter(|id| !resolved.iter().any(|r| r == *id)) {
                warn!(
                    "layer `{}`: plugin `{}` is not loaded or is not a {} plugin, ignoring",
                    name, id, layer_config.kind
                );
            }
            if resolved.is_empty() {
                warn!("layer `{}` has no plugins and will do nothing", name);
            } else {
                info!("layer `{}` ({}) runs [{}]", name, layer_config.kind, resolved.join(", "));
            }
            layers.insert(name.clone(), layer);
        }
        Ok(Self { layers })
    }

    async fn build_one(
        name: &str,
        layer_config: &LayerConfig,
        fifos: &FifoRegistry,
        plugins: &PluginManager,
        context: LayerContext,
    ) -> Result<Arc<dyn Layer>, LayerError> {
        let fifo_error = |source| LayerError::Fifo {
            layer: name.to_string(),
            source,
        };
        let ids = layer_config.plugin_ids();
        let writer_name = layer_config.writer().unwrap_or(DEFAULT_FIFO);
        let reader_name = layer_config.reader().unwrap_or(DEFAULT_FIFO);

        let layer: Arc<dyn Layer> = match layer_config.kind {
            LayerKind::Origin => {
                let writer = fifos.resolve_queue(writer_name).await.map_err(fifo_error)?;
                Arc::new(OriginLayer::new(name, writer, plugins.origins(&ids), context))
            }
            LayerKind::Intermediate => {
                let reader = fifos.resolve_dequeue(reader_name).await.map_err(fifo_error)?;
                let writer = fifos.resolve_queue(writer_name).await.map_err(fifo_error)?;
                Arc::new(IntermediateLayer::new(
                    name,
                    reader,
                    writer,
                    plugins.intermediates(&ids),
                    context,
                ))
            }
            LayerKind::Terminal => {
                let reader = fifos.resolve_dequeue(reader_name).await.map_err(fifo_error)?;
                Arc::new(TerminalLayer::new(name, reader, plugins.terminals(&ids), context))
            }
        };
        Ok(layer)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Layer>> {
        self.layers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.layers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn Layer>)> {
        self.layers.iter()
    }

    pub fn into_layers(self) -> BTreeMap<String, Arc<dyn Layer>> {
        self.layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{BackendType, FifoConfig, PluginSection},
        fifo::{Fifo, FifoError},
        test_support::Probe,
    };
    use sweep_plugin::{Capability, PluginRegistry};

    const KINDS: [Capability; 3] = [Capability::Origin, Capability::Intermediate, Capability::Terminal];

    async fn manager_for(config: &PipelineConfig, registry: PluginRegistry) -> PluginManager {
        PluginManager::load(registry, &config.plugins, &KINDS).await.unwrap()
    }

    fn scenario() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.layers.insert(
            "enumerate".into(),
            LayerConfig::new(LayerKind::Origin).with_queue("q1").with_plugins(&["p1"]),
        );
        config.layers.insert(
            "transform".into(),
            LayerConfig::new(LayerKind::Intermediate)
                .with_dequeue("q1")
                .with_queue("q2")
                .with_plugins(&["p2", "p3", "p1"]),
        );
        config.layers.insert(
            "output".into(),
            LayerConfig::new(LayerKind::Terminal).with_dequeue("q2").with_plugins(&["p3"]),
        );
        let mut parked = LayerConfig::new(LayerKind::Terminal).with_plugins(&["p3"]);
        parked.enabled = false;
        config.layers.insert("parked".into(), parked);
        for id in ["p1", "p2", "p3"] {
            config.plugins.insert(id.into(), PluginSection::enabled(None));
        }
        config
    }

    fn registry() -> PluginRegistry {
        PluginRegistry::new()
            .with(Probe::origin("p1"))
            .with(Probe::intermediate("p2"))
            .with(Probe::terminal("p3"))
    }

    #[tokio::test]
    async fn test_one_layer_per_enabled_entry_with_intersected_plugins() {
        let config = scenario();
        let plugins = manager_for(&config, registry()).await;
        let fifos = FifoRegistry::new(config.fifos.clone());

        let layers = LayerManager::build(&config, &fifos, &plugins, &LayerContext::default())
            .await
            .unwrap();

        assert_eq!(layers.names(), vec!["enumerate", "output", "transform"]);
        let transform = layers.get("transform").unwrap();
        assert_eq!(transform.kind(), LayerKind::Intermediate);
        assert_eq!(transform.plugin_ids(), vec!["p2".to_string()]);
        assert_eq!(layers.get("enumerate").unwrap().plugin_ids(), vec!["p1".to_string()]);
        assert_eq!(layers.get("output").unwrap().kind(), LayerKind::Terminal);
        assert!(layers.get("parked").is_none());
        assert_eq!(fifos.resolved(), vec!["q1".to_string(), "q2".to_string()]);
    }

    #[tokio::test]
    async fn test_layer_without_matching_plugins_is_still_built() {
        let mut config = scenario();
        config.layers.insert(
            "lonely".into(),
            LayerConfig::new(LayerKind::Terminal).with_dequeue("q3").with_plugins(&["p1", "nope"]),
        );
        let plugins = manager_for(&config, registry()).await;
        let fifos = FifoRegistry::new(config.fifos.clone());

        let layers = LayerManager::build(&config, &fifos, &plugins, &LayerContext::default())
            .await
            .unwrap();
        assert!(layers.get("lonely").unwrap().plugin_ids().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_queues_fall_back_to_default() {
        let mut config = PipelineConfig::default();
        config
            .layers
            .insert("in".into(), LayerConfig::new(LayerKind::Origin).with_plugins(&["p1"]));
        config
            .layers
            .insert("out".into(), LayerConfig::new(LayerKind::Terminal).with_plugins(&["p3"]));
        config.plugins.insert("p1".into(), PluginSection::enabled(None));
        config.plugins.insert("p3".into(), PluginSection::enabled(None));
        let plugins = manager_for(&config, registry()).await;
        let fifos = FifoRegistry::new(BTreeMap::new());

        LayerManager::build(&config, &fifos, &plugins, &LayerContext::default())
            .await
            .unwrap();
        assert_eq!(fifos.resolved(), vec![DEFAULT_FIFO.to_string()]);
        assert_eq!(fifos.resolve(DEFAULT_FIFO).await.unwrap().backend(), BackendType::Local);
    }

    #[tokio::test]
    async fn test_fifo_failure_aborts_the_build() {
        let mut config = scenario();
        config.fifos.insert(
            "q2".into(),
            FifoConfig {
                backend: BackendType::Distributed,
                ..FifoConfig::default()
            },
        );
        let plugins = manager_for(&config, registry()).await;
        let fifos = FifoRegistry::new(config.fifos.clone());

        let err = LayerManager::build(&config, &fifos, &plugins, &LayerContext::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            LayerError::Fifo { source: FifoError::MissingBrokerUrl { .. }, .. }
        ));
    }
}
