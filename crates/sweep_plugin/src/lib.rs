//! Plugin SDK for cloudsweep.
//!
//! A plugin author implements [`plugin::Plugin`] plus one or more capability
//! traits ([`plugin::OriginPlugin`], [`plugin::IntermediatePlugin`],
//! [`plugin::TerminalPlugin`], [`plugin::PolicyOutputPlugin`]) and
//! [`settings::Configure`] for its typed configuration, then registers an
//! instance in a [`registry::PluginRegistry`].

pub mod envelope;
pub mod logger;
pub mod pattern;
pub mod plugin;
pub mod registry;
pub mod settings;

pub use envelope::{Envelope, Session};
pub use logger::{LogLevel, PluginLogger};
pub use pattern::InterestPattern;
pub use plugin::{
    Capability, Emit, EmitError, IntermediatePlugin, OriginPlugin, Plugin, PluginError,
    PolicyOutputPlugin, TerminalPlugin, implements,
};
pub use registry::{ActivationError, PendingPlugin, PluginRegistry};
pub use settings::{ConfigBindError, Configure, NoConfig, PluginSettings};
