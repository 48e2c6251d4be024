use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use sweep_plugin::{
    Configure, Plugin, PluginError, PluginLogger, PluginSettings, PolicyOutputPlugin,
};
use tokio::io::AsyncWriteExt;

fn default_pretty() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonReportConfig {
    /// Where to write the report. Stdout when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_pretty")]
    pub pretty: bool,
}

impl Default for JsonReportConfig {
    fn default() -> Self {
        Self {
            path: None,
            pretty: default_pretty(),
        }
    }
}

impl PluginSettings for JsonReportConfig {
    fn fallback() -> Option<Self> {
        Some(Self::default())
    }
}

/// Writes a finished policy-evaluation document as JSON.
#[derive(Default)]
pub struct JsonReport {
    config: JsonReportConfig,
    logger: Option<PluginLogger>,
}

#[async_trait]
impl Plugin for JsonReport {
    fn id(&self) -> &str {
        "json-report"
    }

    fn as_policy_output(self: Arc<Self>) -> Option<Arc<dyn PolicyOutputPlugin>> {
        Some(self)
    }
}

#[async_trait]
impl Configure for JsonReport {
    type Config = JsonReportConfig;

    async fn init(&mut self, config: JsonReportConfig, logger: PluginLogger) -> Result<(), PluginError> {
        self.config = config;
        self.logger = Some(logger);
        Ok(())
    }
}

#[async_trait]
impl PolicyOutputPlugin for JsonReport {
    async fn generate_report(&self, document: &Value) -> Result<(), PluginError> {
        let mut rendered = if self.config.pretty {
            serde_json::to_vec_pretty(document)?
        } else {
            serde_json::to_vec(document)?
        };
        rendered.push(b'\n');

        match &self.config.path {
            Some(path) => {
                tokio::fs::write(path, &rendered).await?;
                if let Some(log) = &self.logger {
                    log.info(&format!("report written to {}", path.display()));
                }
            }
            None => {
                let mut out = tokio::io::stdout();
                out.write_all(&rendered).await?;
                out.flush().await?;
            }
        }
        Ok(())
    }
}
