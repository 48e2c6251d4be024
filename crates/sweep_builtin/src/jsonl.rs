use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use sweep_plugin::{
    Configure, Envelope, Plugin, PluginError, PluginLogger, PluginSettings, TerminalPlugin,
};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};

fn default_append() -> bool {
    true
}

/// No fallback: the output path has to be configured.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonlFileConfig {
    pub path: PathBuf,
    #[serde(default = "default_append")]
    pub append: bool,
}

impl PluginSettings for JsonlFileConfig {}

/// Appends every envelope as one JSON line to a file.
#[derive(Default)]
pub struct JsonlFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
    logger: Option<PluginLogger>,
}

#[async_trait]
impl Plugin for JsonlFile {
    fn id(&self) -> &str {
        "jsonl-file"
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        if let Some(mut file) = self.file.lock().await.take() {
            file.flush().await?;
            file.sync_all().await?;
            if let Some(log) = &self.logger {
                log.info(&format!("closed {}", self.path.display()));
            }
        }
        Ok(())
    }

    fn as_terminal(self: Arc<Self>) -> Option<Arc<dyn TerminalPlugin>> {
        Some(self)
    }
}

#[async_trait]
impl Configure for JsonlFile {
    type Config = JsonlFileConfig;

    async fn init(&mut self, config: JsonlFileConfig, logger: PluginLogger) -> Result<(), PluginError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(config.append)
            .truncate(!config.append)
            .open(&config.path)
            .await?;
        logger.info(&format!("writing envelopes to {}", config.path.display()));
        self.path = config.path;
        self.file = Mutex::new(Some(file));
        self.logger = Some(logger);
        Ok(())
    }
}

#[async_trait]
impl TerminalPlugin for JsonlFile {
    async fn accept(&self, envelope: &Envelope) -> Result<(), PluginError> {
        let mut line = serde_json::to_vec(envelope)?;
        line.push(b'\n');
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(PluginError::NotInitialised)?;
        file.write_all(&line).await?;
        Ok(())
    }
}
