use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use sweep_plugin::{
    Configure, Envelope, Plugin, PluginError, PluginLogger, PluginSettings, TerminalPlugin,
};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StdoutConfig {
    #[serde(default)]
    pub pretty: bool,
}

impl PluginSettings for StdoutConfig {
    fn fallback() -> Option<Self> {
        Some(Self::default())
    }
}

/// Prints every envelope it receives as JSON.
#[derive(Default)]
pub struct Stdout {
    pretty: bool,
}

impl Stdout {
    fn render(&self, envelope: &Envelope) -> Result<String, serde_json::Error> {
        if self.pretty {
            serde_json::to_string_pretty(envelope)
        } else {
            serde_json::to_string(envelope)
        }
    }
}

#[async_trait]
impl Plugin for Stdout {
    fn id(&self) -> &str {
        "stdout"
    }

    fn as_terminal(self: Arc<Self>) -> Option<Arc<dyn TerminalPlugin>> {
        Some(self)
    }
}

#[async_trait]
impl Configure for Stdout {
    type Config = StdoutConfig;

    async fn init(&mut self, config: StdoutConfig, _logger: PluginLogger) -> Result<(), PluginError> {
        self.pretty = config.pretty;
        Ok(())
    }
}

#[async_trait]
impl TerminalPlugin for Stdout {
    async fn accept(&self, envelope: &Envelope) -> Result<(), PluginError> {
        let mut line = self.render(envelope)?;
        line.push('\n');
        let mut out = tokio::io::stdout();
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}
