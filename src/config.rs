//! The pipeline document: `layers`, `fifos`, `plugins` and an optional `engine` section.

use std::{
    collections::{BTreeMap, HashMap},
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use petgraph::{algo::is_cyclic_directed, graph::DiGraph};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::Display;
use thiserror::Error;
use tracing::{info, warn};

/// Fifo used when a layer does not name one.
pub const DEFAULT_FIFO: &str = "default";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error in {path}: {message}")]
    Yaml { path: PathBuf, message: String },

    #[error("JSON parse error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("layer `{layer}`: {reason}")]
    InvalidLayer { layer: String, reason: String },
}

fn yes() -> bool {
    true
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LayerKind {
    Origin,
    Intermediate,
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LayerConfig {
    #[serde(default = "yes")]
    pub enabled: bool,
    pub kind: LayerKind,
    /// Write side. Not allowed on terminal layers.
    #[serde(default, alias = "queue_name", skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Read side. Not allowed on origin layers.
    #[serde(default, alias = "dequeue_name", skip_serializing_if = "Option::is_none")]
    pub dequeue: Option<String>,
    /// Plugin ids, in the order they run.
    #[serde(default, alias = "plugin_ids")]
    pub plugins: Vec<String>,
}

impl LayerConfig {
    pub fn new(kind: LayerKind) -> Self {
        Self {
            enabled: true,
            kind,
            queue: None,
            dequeue: None,
            plugins: Vec::new(),
        }
    }

    pub fn with_queue(mut self, name: &str) -> Self {
        self.queue = Some(name.to_string());
        self
    }

    pub fn with_dequeue(mut self, name: &str) -> Self {
        self.dequeue = Some(name.to_string());
        self
    }

    pub fn with_plugins(mut self, ids: &[&str]) -> Self {
        self.plugins = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Fifo this layer writes to, if its kind writes at all.
    pub fn writer(&self) -> Option<&str> {
        match self.kind {
            LayerKind::Terminal => None,
            _ => Some(self.queue.as_deref().unwrap_or(DEFAULT_FIFO)),
        }
    }

    /// Fifo this layer reads from, if its kind reads at all.
    pub fn reader(&self) -> Option<&str> {
        match self.kind {
            LayerKind::Origin => None,
            _ => Some(self.dequeue.as_deref().unwrap_or(DEFAULT_FIFO)),
        }
    }

    /// Configured plugin ids with duplicates removed, first occurrence wins.
    pub fn plugin_ids(&self) -> Vec<&str> {
        let mut seen = Vec::with_capacity(self.plugins.len());
        for id in &self.plugins {
            if !seen.contains(&id.as_str()) {
                seen.push(id.as_str());
            }
        }
        seen
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidLayer {
            layer: name.to_string(),
            reason: reason.to_string(),
        };
        match self.kind {
            LayerKind::Origin if self.dequeue.is_some() => Err(invalid("origin layers cannot have a dequeue")),
            LayerKind::Terminal if self.queue.is_some() => Err(invalid("terminal layers cannot have a queue")),
            LayerKind::Intermediate if self.reader() == self.writer() => {
                Err(invalid("intermediate layers cannot read and write the same fifo"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackendType {
    #[default]
    Local,
    Distributed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FifoConfig {
    #[serde(default = "yes")]
    pub enabled: bool,
    #[serde(default, rename = "type", alias = "backend")]
    pub backend: BackendType,
    /// Broker address, required for distributed fifos.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// JetStream stream name. Derived from the fifo name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    /// Durable consumer shared by every reader of this fifo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_group: Option<String>,
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackendType::Local,
            url: None,
            stream: None,
            consumer_group: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PluginSection {
    #[serde(default = "yes")]
    pub enabled: bool,
    /// Plugin specific; bound to the plugin's own config type at load time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

impl PluginSection {
    pub fn enabled(config: Option<Value>) -> Self {
        Self { enabled: true, config }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            config: None,
        }
    }
}

fn default_grace_period_ms() -> u64 {
    3_000
}

fn default_idle_delay_ms() -> u64 {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    /// Wait after the origin layers finish before stopping everything.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Pause between two empty polls of a non-origin layer.
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
    /// Per-plugin deadline for a single call. Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            idle_delay_ms: default_idle_delay_ms(),
            plugin_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn plugin_timeout(&self) -> Option<Duration> {
        self.plugin_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineConfig {
    #[serde(default)]
    pub layers: BTreeMap<String, LayerConfig>,
    #[serde(default)]
    pub fifos: BTreeMap<String, FifoConfig>,
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginSection>,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl PipelineConfig {
    /// Read a pipeline file. `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|os| os.to_str())
            .unwrap_or_default()
            .to_lowercase();
        let config: PipelineConfig = match ext.as_str() {
            "json" => serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?,
            _ => serde_yaml_bw::from_str(&contents).map_err(|e| ConfigError::Yaml {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?,
        };
        config.validate()?;
        info!(
            "Loaded pipeline from {} ({} layers, {} fifos, {} plugin sections)",
            path.display(),
            config.layers.len(),
            config.fifos.len(),
            config.plugins.len()
        );
        Ok(config)
    }

    /// Structural checks that must hold before anything is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, layer) in &self.layers {
            layer.validate(name)?;
        }
        if self.has_wiring_cycle() {
            warn!("fifo wiring contains a cycle; envelopes may circulate until the scan stops");
        }
        Ok(())
    }

    pub fn enabled_layers(&self) -> impl Iterator<Item = (&String, &LayerConfig)> {
        self.layers.iter().filter(|(_, l)| l.enabled)
    }

    /// Whether the enabled layers route fifos into each other in a loop.
    pub fn has_wiring_cycle(&self) -> bool {
        let mut graph = DiGraph::<&str, &str>::new();
        let mut index_of = HashMap::new();
        for (name, layer) in self.enabled_layers() {
            if let (Some(from), Some(to)) = (layer.reader(), layer.writer()) {
                let i = *index_of.entry(from).or_insert_with(|| graph.add_node(from));
                let j = *index_of.entry(to).or_insert_with(|| graph.add_node(to));
                graph.add_edge(i, j, name.as_str());
            }
        }
        is_cyclic_directed(&graph)
    }
}

/// Load `.env` next to the pipeline file (or in the working directory) into the
/// process environment. `Ok(false)` when there is no such file.
///
/// Runs before logging is set up, so the caller reports the outcome.
pub fn load_env_file(env_file: &Path) -> Result<bool, dotenvy::Error> {
    if !env_file.exists() {
        return Ok(false);
    }
    dotenvy::from_path(env_file).map(|()| true)
}

/// `$CLOUDSWEEP_CONFIG`, falling back to `./cloudsweep.yaml`.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| env::var("CLOUDSWEEP_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("cloudsweep.yaml"))
}
