//! Compiled-in plugin registry.
//!
//! There is no runtime discovery: a binary builds a [`PluginRegistry`] at
//! startup by registering one instance of every plugin it ships, and the host's
//! plugin manager consumes it. Registration records which capabilities each
//! plugin implements so the table can be queried before anything is initialised.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use strum::IntoEnumIterator;
use thiserror::Error;

use crate::{
    logger::PluginLogger,
    plugin::{Capability, Plugin, PluginError, implements},
    settings::{ConfigBindError, Configure, bind},
};

#[derive(Error, Debug)]
pub enum ActivationError {
    #[error(transparent)]
    Bind(#[from] ConfigBindError),

    #[error("plugin `{plugin}` failed to initialise: {source}")]
    Init {
        plugin: String,
        #[source]
        source: PluginError,
    },
}

/// A registered plugin that has not been configured yet.
#[async_trait]
pub trait PendingPlugin: Send {
    fn id(&self) -> &str;

    fn capabilities(&self) -> &[Capability];

    /// Bind `document` to the plugin's typed config, run `init`, and hand back
    /// the shareable plugin.
    async fn activate(
        self: Box<Self>,
        document: Option<Value>,
        logger: PluginLogger,
    ) -> Result<Arc<dyn Plugin>, ActivationError>;
}

struct Pending<P: Configure> {
    id: String,
    capabilities: Vec<Capability>,
    plugin: P,
}

#[async_trait]
impl<P: Configure> PendingPlugin for Pending<P> {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn activate(
        self: Box<Self>,
        document: Option<Value>,
        logger: PluginLogger,
    ) -> Result<Arc<dyn Plugin>, ActivationError> {
        let Pending { id, mut plugin, .. } = *self;
        let config = bind::<P::Config>(&id, document)?;
        plugin
            .init(config, logger)
            .await
            .map_err(|source| ActivationError::Init { plugin: id, source })?;
        Ok(Arc::new(plugin))
    }
}

fn detect_capabilities<P: Plugin>(plugin: P) -> (P, Vec<Capability>) {
    let shared = Arc::new(plugin);
    let capabilities = {
        let erased: Arc<dyn Plugin> = Arc::clone(&shared) as Arc<dyn Plugin>;
        Capability::iter()
            .filter(|capability| implements(&erased, *capability))
            .collect()
    };
    match Arc::try_unwrap(shared) {
        Ok(plugin) => (plugin, capabilities),
        Err(_) => unreachable!("capability checks drop their handles before unwrapping"),
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn PendingPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin. Ids are unique; registering one twice is a programming
    /// error and panics.
    pub fn register<P: Configure>(&mut self, plugin: P) -> &mut Self {
        let id = plugin.id().to_string();
        assert!(
            !self.plugins.iter().any(|p| p.id() == id),
            "plugin id `{id}` registered twice"
        );
        let (plugin, capabilities) = detect_capabilities(plugin);
        self.plugins.push(Box::new(Pending {
            id,
            capabilities,
            plugin,
        }));
        self
    }

    pub fn with<P: Configure>(mut self, plugin: P) -> Self {
        self.register(plugin);
        self
    }

    pub fn ids(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.id()).collect()
    }

    /// Ids of the registered plugins implementing `capability`, in registration order.
    pub fn by_capability(&self, capability: Capability) -> Vec<&str> {
        self.plugins
            .iter()
            .filter(|p| p.capabilities().contains(&capability))
            .map(|p| p.id())
            .collect()
    }

    pub fn capabilities_of(&self, id: &str) -> Option<&[Capability]> {
        self.plugins.iter().find(|p| p.id() == id).map(|p| p.capabilities())
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn into_pending(self) -> Vec<Box<dyn PendingPlugin>> {
        self.plugins
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        envelope::{Envelope, Session},
        plugin::{Emit, OriginPlugin, TerminalPlugin},
        settings::{NoConfig, PluginSettings},
    };
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Default)]
    struct Both {
        label: String,
    }

    #[derive(Deserialize)]
    struct BothConfig {
        label: String,
    }
    impl PluginSettings for BothConfig {}

    #[async_trait]
    impl Plugin for Both {
        fn id(&self) -> &str {
            "both"
        }
        fn as_origin(self: Arc<Self>) -> Option<Arc<dyn OriginPlugin>> {
            Some(self)
        }
        fn as_terminal(self: Arc<Self>) -> Option<Arc<dyn TerminalPlugin>> {
            Some(self)
        }
    }

    #[async_trait]
    impl OriginPlugin for Both {
        async fn discover(&self, _session: &Session, _emit: &dyn Emit) -> Result<(), PluginError> {
            Ok(())
        }
    }

    #[async_trait]
    impl TerminalPlugin for Both {
        async fn accept(&self, _envelope: &Envelope) -> Result<(), PluginError> {
            Ok(())
        }
    }

    #[async_trait]
    impl Configure for Both {
        type Config = BothConfig;
        async fn init(&mut self, config: BothConfig, _logger: PluginLogger) -> Result<(), PluginError> {
            self.label = config.label;
            Ok(())
        }
    }

    struct Quiet;

    #[async_trait]
    impl Plugin for Quiet {
        fn id(&self) -> &str {
            "quiet"
        }
    }

    #[async_trait]
    impl Configure for Quiet {
        type Config = NoConfig;
        async fn init(&mut self, _config: NoConfig, _logger: PluginLogger) -> Result<(), PluginError> {
            Err(PluginError::Other("refusing".into()))
        }
    }

    #[test]
    fn test_registration_records_capabilities() {
        let registry = PluginRegistry::new().with(Both::default()).with(Quiet);
        assert_eq!(registry.ids(), vec!["both", "quiet"]);
        assert_eq!(registry.by_capability(Capability::Terminal), vec!["both"]);
        assert!(registry.by_capability(Capability::Intermediate).is_empty());
        assert_eq!(registry.capabilities_of("quiet"), Some(&[][..]));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_id_panics() {
        let _ = PluginRegistry::new().with(Quiet).with(Quiet);
    }

    #[tokio::test]
    async fn test_activate_binds_and_inits() {
        let mut pending = PluginRegistry::new().with(Both::default()).into_pending();
        let plugin = pending
            .remove(0)
            .activate(Some(json!({"label": "x"})), PluginLogger::new("both"))
            .await
            .unwrap();
        assert_eq!(plugin.id(), "both");
    }

    #[tokio::test]
    async fn test_activate_reports_bind_and_init_failures() {
        let mut pending = PluginRegistry::new().with(Both::default()).with(Quiet).into_pending();
        let quiet = pending.pop().unwrap();
        let both = pending.pop().unwrap();

        let err = both.activate(None, PluginLogger::new("both")).await.err().unwrap();
        assert!(matches!(err, ActivationError::Bind(ConfigBindError::Missing { .. })));

        let err = quiet.activate(None, PluginLogger::new("quiet")).await.err().unwrap();
        assert!(matches!(err, ActivationError::Init { ref plugin, .. } if plugin == "quiet"));
    }
}
