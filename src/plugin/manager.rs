// src/plugin/manager.rs

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use sweep_plugin::{
    ActivationError, Capability, ConfigBindError, IntermediatePlugin, OriginPlugin, Plugin,
    PluginError, PluginLogger, PluginRegistry, PolicyOutputPlugin, TerminalPlugin, implements,
};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::PluginSection;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Bind(#[from] ConfigBindError),

    #[error("plugin `{plugin}` failed to initialise: {source}")]
    Init {
        plugin: String,
        #[source]
        source: PluginError,
    },

    #[error("no plugins were loaded for [{requested}]; check the `plugins` section of the pipeline")]
    NoPluginsFound { requested: String },
}

impl From<ActivationError> for LoadError {
    fn from(err: ActivationError) -> Self {
        match err {
            ActivationError::Bind(e) => LoadError::Bind(e),
            ActivationError::Init { plugin, source } => LoadError::Init { plugin, source },
        }
    }
}

/// Initialised plugins, indexed by capability.
///
/// Built once from the compiled-in [`PluginRegistry`] and the `plugins`
/// section of the pipeline; read-only afterwards.
pub struct PluginManager {
    loaded: Vec<Arc<dyn Plugin>>,
    by_capability: BTreeMap<Capability, Vec<Arc<dyn Plugin>>>,
    shut_down: AtomicBool,
}

impl PluginManager {
    /// Activate every registered plugin that has an enabled section and plays
    /// at least one of `kinds`.
    ///
    /// Missing and disabled sections are skipped. A config that does not bind
    /// or an `init` that fails stops the whole load.
    pub async fn load(
        registry: PluginRegistry,
        sections: &BTreeMap<String, PluginSection>,
        kinds: &[Capability],
    ) -> Result<Self, LoadError> {
        let mut loaded = Vec::new();
        let mut by_capability: BTreeMap<Capability, Vec<Arc<dyn Plugin>>> = BTreeMap::new();

        for pending in registry.into_pending() {
            let id = pending.id().to_string();
            let Some(section) = sections.get(&id) else {
                info!("plugin `{}` has no configuration entry, skipping", id);
                continue;
            };
            if !section.enabled {
                info!("plugin `{}` is disabled, skipping", id);
                continue;
            }
            if !pending.capabilities().iter().any(|c| kinds.contains(c)) {
                debug!("plugin `{}` plays none of the requested capabilities, skipping", id);
                continue;
            }

            let plugin = pending
                .activate(section.config.clone(), PluginLogger::new(id.as_str()))
                .await?;

            let mut roles = Vec::new();
            for &kind in kinds {
                if implements(&plugin, kind) {
                    by_capability.entry(kind).or_default().push(Arc::clone(&plugin));
                    roles.push(kind.to_string());
                }
            }
            info!("plugin `{}` loaded as [{}]", id, roles.join(", "));
            loaded.push(plugin);
        }

        if by_capability.values().all(Vec::is_empty) {
            let requested: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
            return Err(LoadError::NoPluginsFound {
                requested: requested.join(", "),
            });
        }

        Ok(Self {
            loaded,
            by_capability,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Plugins recorded under `capability`, in registration order.
    pub fn by_capability(&self, capability: Capability) -> &[Arc<dyn Plugin>] {
        self.by_capability
            .get(&capability)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The loaded plugin with this id.
    ///
    /// # Panics
    /// If more than one loaded plugin carries `id`. Registration rejects
    /// duplicate ids, so this can only be a bug in the host.
    pub fn by_id(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        let mut matches = self.loaded.iter().filter(|p| p.id() == id);
        let first = matches.next().cloned();
        assert!(matches.next().is_none(), "plugin id `{id}` is loaded more than once");
        first
    }

    pub fn ids(&self) -> Vec<&str> {
        self.loaded.iter().map(|p| p.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// Origin plugins named in `ids`, in that order. Unknown ids and plugins
    /// of other kinds are left out.
    pub fn origins(&self, ids: &[&str]) -> Vec<Arc<dyn OriginPlugin>> {
        self.select(Capability::Origin, ids, |p| p.as_origin())
    }

    pub fn intermediates(&self, ids: &[&str]) -> Vec<Arc<dyn IntermediatePlugin>> {
        self.select(Capability::Intermediate, ids, |p| p.as_intermediate())
    }

    pub fn terminals(&self, ids: &[&str]) -> Vec<Arc<dyn TerminalPlugin>> {
        self.select(Capability::Terminal, ids, |p| p.as_terminal())
    }

    /// Every loaded policy-output plugin.
    pub fn policy_outputs(&self) -> Vec<Arc<dyn PolicyOutputPlugin>> {
        self.by_capability(Capability::PolicyOutput)
            .iter()
            .filter_map(|p| Arc::clone(p).as_policy_output())
            .collect()
    }

    fn select<T: ?Sized>(
        &self,
        capability: Capability,
        ids: &[&str],
        view: impl Fn(Arc<dyn Plugin>) -> Option<Arc<T>>,
    ) -> Vec<Arc<T>> {
        let candidates = self.by_capability(capability);
        ids.iter()
            .filter_map(|id| candidates.iter().find(|p| p.id() == *id))
            .filter_map(|p| view(Arc::clone(p)))
            .collect()
    }

    /// Run every loaded plugin's shutdown hook once. Later calls do nothing.
    /// Failures are logged; every plugin gets its turn.
    pub async fn shutdown_all(&self) -> usize {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let mut failures = 0;
        for plugin in &self.loaded {
            match AssertUnwindSafe(plugin.shutdown()).catch_unwind().await {
                Ok(Ok(())) => debug!("plugin `{}` shut down", plugin.id()),
                Ok(Err(e)) => {
                    failures += 1;
                    error!("plugin `{}` failed to shut down: {}", plugin.id(), e);
                }
                Err(_) => {
                    failures += 1;
                    error!("plugin `{}` panicked while shutting down", plugin.id());
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Probe;
    use serde_json::json;

    const ALL: [Capability; 3] = [Capability::Origin, Capability::Intermediate, Capability::Terminal];

    fn sections(entries: &[(&str, PluginSection)]) -> BTreeMap<String, PluginSection> {
        entries.iter().map(|(id, s)| (id.to_string(), s.clone())).collect()
    }

    #[tokio::test]
    async fn test_loads_only_configured_and_enabled_plugins() {
        let configured = Probe::origin("p1");
        let disabled = Probe::terminal("p2");
        let unconfigured = Probe::terminal("p3");
        let (l1, l2, l3) = (configured.log(), disabled.log(), unconfigured.log());

        let registry = PluginRegistry::new().with(configured).with(disabled).with(unconfigured);
        let manager = PluginManager::load(
            registry,
            &sections(&[("p1", PluginSection::enabled(None)), ("p2", PluginSection::disabled())]),
            &ALL,
        )
        .await
        .unwrap();

        assert_eq!(manager.ids(), vec!["p1"]);
        assert_eq!((l1.inits(), l2.inits(), l3.inits()), (1, 0, 0));
        assert_eq!(manager.by_capability(Capability::Origin).len(), 1);
        assert!(manager.by_capability(Capability::Terminal).is_empty());
    }

    #[tokio::test]
    async fn test_nothing_enabled_is_fatal() {
        let registry = PluginRegistry::new().with(Probe::origin("p1"));
        let err = PluginManager::load(registry, &sections(&[("p1", PluginSection::disabled())]), &ALL)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::NoPluginsFound { .. }));
    }

    #[tokio::test]
    async fn test_plugin_outside_requested_kinds_is_not_initialised() {
        let reporter = Probe::policy_output("r");
        let log = reporter.log();
        let registry = PluginRegistry::new().with(reporter).with(Probe::origin("o"));
        let entries = sections(&[("r", PluginSection::enabled(None)), ("o", PluginSection::enabled(None))]);

        let manager = PluginManager::load(registry, &entries, &ALL).await.unwrap();
        assert_eq!(manager.ids(), vec!["o"]);
        assert_eq!(log.inits(), 0);
    }

    #[tokio::test]
    async fn test_multi_capability_plugin_is_recorded_under_each() {
        let both = Probe::new("both", &[Capability::Intermediate, Capability::Terminal]);
        let registry = PluginRegistry::new().with(both);
        let manager = PluginManager::load(registry, &sections(&[("both", PluginSection::enabled(None))]), &ALL)
            .await
            .unwrap();

        assert_eq!(manager.intermediates(&["both"]).len(), 1);
        assert_eq!(manager.terminals(&["both"]).len(), 1);
        assert!(manager.origins(&["both"]).is_empty());
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_init_failure_is_fatal() {
        let registry = PluginRegistry::new()
            .with(Probe::origin("ok"))
            .with(Probe::origin("bad").refusing_init());
        let entries = sections(&[("ok", PluginSection::enabled(None)), ("bad", PluginSection::enabled(None))]);
        let err = PluginManager::load(registry, &entries, &ALL).await.err().unwrap();
        assert!(matches!(err, LoadError::Init { ref plugin, .. } if plugin == "bad"));
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        use sweep_plugin::PluginSettings;

        #[derive(serde::Deserialize)]
        struct NeedsPath {
            #[allow(dead_code)]
            path: String,
        }
        impl PluginSettings for NeedsPath {}

        #[derive(Default)]
        struct Strict;

        #[async_trait::async_trait]
        impl Plugin for Strict {
            fn id(&self) -> &str {
                "strict"
            }

            fn as_terminal(self: Arc<Self>) -> Option<Arc<dyn TerminalPlugin>> {
                Some(self)
            }
        }

        #[async_trait::async_trait]
        impl sweep_plugin::Configure for Strict {
            type Config = NeedsPath;

            async fn init(&mut self, _config: NeedsPath, _logger: PluginLogger) -> Result<(), PluginError> {
                Ok(())
            }
        }

        #[async_trait::async_trait]
        impl TerminalPlugin for Strict {
            async fn accept(&self, _envelope: &sweep_plugin::Envelope) -> Result<(), PluginError> {
                Ok(())
            }
        }

        let missing = PluginManager::load(
            PluginRegistry::new().with(Strict),
            &sections(&[("strict", PluginSection::enabled(None))]),
            &ALL,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(missing, LoadError::Bind(ConfigBindError::Missing { .. })));

        let mistyped = PluginManager::load(
            PluginRegistry::new().with(Strict),
            &sections(&[("strict", PluginSection::enabled(Some(json!({"path": 42}))))]),
            &ALL,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(mistyped, LoadError::Bind(ConfigBindError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_selection_follows_requested_order() {
        let registry = PluginRegistry::new()
            .with(Probe::terminal("a"))
            .with(Probe::terminal("b"))
            .with(Probe::origin("c"));
        let entries = sections(&[
            ("a", PluginSection::enabled(None)),
            ("b", PluginSection::enabled(None)),
            ("c", PluginSection::enabled(None)),
        ]);
        let manager = PluginManager::load(registry, &entries, &ALL).await.unwrap();

        let ids: Vec<String> = manager
            .terminals(&["b", "c", "missing", "a"])
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(manager.by_id("c").is_some());
        assert!(manager.by_id("missing").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_hooks_run_once() {
        let probe = Probe::terminal("t");
        let log = probe.log();
        let manager = PluginManager::load(
            PluginRegistry::new().with(probe),
            &sections(&[("t", PluginSection::enabled(None))]),
            &ALL,
        )
        .await
        .unwrap();

        assert_eq!(manager.shutdown_all().await, 0);
        manager.shutdown_all().await;
        assert_eq!(log.shutdowns(), 1);
    }
}
