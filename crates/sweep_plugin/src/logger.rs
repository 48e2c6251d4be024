use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// What log levels are supported?
/// Higher-value variants are more severe.
#[derive(
    Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Critical = 5,
}

/// Logger handed to a plugin in `init`.
/// Every line it writes carries the plugin id so plugin output can be
/// told apart in the host's logs.
#[derive(Debug, Clone)]
pub struct PluginLogger {
    plugin_id: String,
}

impl PluginLogger {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn log(&self, level: LogLevel, msg: &str) {
        let plugin = self.plugin_id.as_str();
        match level {
            LogLevel::Trace => tracing::trace!(%plugin, "{msg}"),
            LogLevel::Debug => tracing::debug!(%plugin, "{msg}"),
            LogLevel::Info => tracing::info!(%plugin, "{msg}"),
            LogLevel::Warn => tracing::warn!(%plugin, "{msg}"),
            LogLevel::Error => tracing::error!(%plugin, "{msg}"),
            LogLevel::Critical => tracing::error!(%plugin, "[CRITICAL] {msg}"),
        }
    }

    pub fn debug(&self, msg: &str) {
        self.log(LogLevel::Debug, msg);
    }

    pub fn info(&self, msg: &str) {
        self.log(LogLevel::Info, msg);
    }

    pub fn warn(&self, msg: &str) {
        self.log(LogLevel::Warn, msg);
    }

    pub fn error(&self, msg: &str) {
        self.log(LogLevel::Error, msg);
    }
}
