//! Typed plugin configuration.
//!
//! The host hands every plugin the untyped `config` document of its section in
//! the pipeline file. [`bind`] turns that document into the plugin's declared
//! [`PluginSettings`] type:
//!
//! * a plugin declaring [`NoConfig`] gets `NoConfig`, whatever the document says;
//! * a present document is decoded field by field through serde;
//! * an absent document falls back to [`PluginSettings::fallback`] when the type
//!   has a zero-argument construction path;
//! * otherwise binding fails with [`ConfigBindError::Missing`].

use async_trait::async_trait;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

use crate::{logger::PluginLogger, plugin::{Plugin, PluginError}};

#[derive(Error, Debug)]
pub enum ConfigBindError {
    #[error("plugin `{plugin}` requires a `config` document but none was given")]
    Missing { plugin: String },

    #[error("plugin `{plugin}` config does not match its declared type: {source}")]
    Decode {
        plugin: String,
        #[source]
        source: serde_json::Error,
    },
}

pub trait PluginSettings: DeserializeOwned + Send + 'static {
    /// `false` only for [`NoConfig`]: the document is ignored entirely.
    const DECLARED: bool = true;

    /// Value used when no document is configured. `None` makes the document mandatory.
    fn fallback() -> Option<Self> {
        None
    }
}

/// Configuration type for plugins that take none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct NoConfig;

impl PluginSettings for NoConfig {
    const DECLARED: bool = false;

    fn fallback() -> Option<Self> {
        Some(NoConfig)
    }
}

/// Bind an untyped document to the typed configuration of `plugin`.
pub fn bind<C: PluginSettings>(plugin: &str, document: Option<Value>) -> Result<C, ConfigBindError> {
    if !C::DECLARED {
        return C::fallback().ok_or_else(|| ConfigBindError::Missing {
            plugin: plugin.to_string(),
        });
    }
    match document {
        Some(doc) if !doc.is_null() => serde_json::from_value(doc).map_err(|source| ConfigBindError::Decode {
            plugin: plugin.to_string(),
            source,
        }),
        _ => C::fallback().ok_or_else(|| ConfigBindError::Missing {
            plugin: plugin.to_string(),
        }),
    }
}

/// Initialisation half of the plugin contract. Kept apart from [`Plugin`]
/// because the associated config type makes it unusable as a trait object;
/// the registry erases it before the host sees the plugin.
#[async_trait]
pub trait Configure: Plugin + Sized {
    type Config: PluginSettings;

    async fn init(&mut self, config: Self::Config, logger: PluginLogger) -> Result<(), PluginError>;
}
