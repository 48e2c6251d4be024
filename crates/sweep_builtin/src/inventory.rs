use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use sweep_plugin::{
    Configure, Emit, Envelope, OriginPlugin, Plugin, PluginError, PluginLogger, PluginSettings,
    Session,
};

/// One resource as listed in the plugin's config.
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryItem {
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaticInventoryConfig {
    #[serde(default)]
    pub resources: Vec<InventoryItem>,
    /// JSON array of further resources, e.g. an export from a cloud CLI.
    /// Read on every sweep, after the inline ones are emitted.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl PluginSettings for StaticInventoryConfig {
    fn fallback() -> Option<Self> {
        Some(Self::default())
    }
}

/// Origin plugin that "discovers" a fixed list of resources. Useful for dry
/// runs of a pipeline definition and for exercising downstream layers.
#[derive(Default)]
pub struct StaticInventory {
    resources: Vec<InventoryItem>,
    file: Option<PathBuf>,
    logger: Option<PluginLogger>,
}

impl StaticInventory {
    async fn read_file(&self) -> Result<Vec<InventoryItem>, PluginError> {
        let Some(path) = &self.file else {
            return Ok(Vec::new());
        };
        let raw = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[async_trait]
impl Plugin for StaticInventory {
    fn id(&self) -> &str {
        "static-inventory"
    }

    fn as_origin(self: Arc<Self>) -> Option<Arc<dyn OriginPlugin>> {
        Some(self)
    }
}

#[async_trait]
impl Configure for StaticInventory {
    type Config = StaticInventoryConfig;

    async fn init(&mut self, config: StaticInventoryConfig, logger: PluginLogger) -> Result<(), PluginError> {
        logger.info(&format!("{} resources configured", config.resources.len()));
        self.resources = config.resources;
        self.file = config.file;
        self.logger = Some(logger);
        Ok(())
    }
}

#[async_trait]
impl OriginPlugin for StaticInventory {
    async fn discover(&self, session: &Session, emit: &dyn Emit) -> Result<(), PluginError> {
        let mut rejected = 0usize;
        let mut total = self.resources.len();
        for item in &self.resources {
            let envelope = Envelope::new(session, item.kind.clone(), item.payload.clone());
            if let Err(err) = emit.emit(envelope).await {
                rejected += 1;
                if let Some(log) = &self.logger {
                    log.warn(&format!("dropping `{}`: {err}", item.kind));
                }
            }
        }
        let from_file = self.read_file().await?;
        total += from_file.len();
        for item in from_file {
            let kind = item.kind.clone();
            if let Err(err) = emit.emit(Envelope::new(session, item.kind, item.payload)).await {
                rejected += 1;
                if let Some(log) = &self.logger {
                    log.warn(&format!("dropping `{kind}`: {err}"));
                }
            }
        }
        if rejected > 0 {
            return Err(PluginError::Other(format!(
                "{rejected} of {total} resources could not be emitted"
            )));
        }
        Ok(())
    }
}
