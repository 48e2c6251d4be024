use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

use crate::{envelope::{Envelope, Session}, pattern::InterestPattern};

/// The four roles a plugin can play. A single plugin may implement several.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    Origin,
    Intermediate,
    Terminal,
    PolicyOutput,
}

/// Errors that a plugin implementation can return.
#[derive(Error, Debug)]
pub enum PluginError {
    /// Something went wrong sending or receiving JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The plugin was used before `init` or after `shutdown`.
    #[error("plugin is not initialised")]
    NotInitialised,

    #[error("emit failed: {0}")]
    Emit(#[from] EmitError),

    /// The plugin returned an unspecified failure.
    #[error("plugin error: {0}")]
    Other(String),
}

impl From<anyhow::Error> for PluginError {
    fn from(err: anyhow::Error) -> PluginError {
        PluginError::Other(err.to_string())
    }
}

/// Why an emitted envelope did not make it onto the writer queue.
/// The envelope is dropped; the host does not retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmitError {
    #[error("queue `{queue}` rejected the envelope: {reason}")]
    Rejected { queue: String, reason: String },

    #[error("layer `{0}` has no writer queue")]
    NoWriter(String),
}

/// Handle through which origin and intermediate plugins hand envelopes to
/// the next stage. The host appends the emitting plugin's id to the
/// envelope's provenance before it is queued.
#[async_trait]
pub trait Emit: Send + Sync {
    async fn emit(&self, envelope: Envelope) -> Result<(), EmitError>;
}

/// Identity and lifecycle shared by every plugin.
///
/// Capability accessors default to `None`; a plugin overrides the ones for the
/// roles it implements with `Some(self)`.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Globally unique, stable across restarts.
    fn id(&self) -> &str;

    /// Called once when the pipeline stops.
    async fn shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }

    fn as_origin(self: Arc<Self>) -> Option<Arc<dyn OriginPlugin>> {
        None
    }

    fn as_intermediate(self: Arc<Self>) -> Option<Arc<dyn IntermediatePlugin>> {
        None
    }

    fn as_terminal(self: Arc<Self>) -> Option<Arc<dyn TerminalPlugin>> {
        None
    }

    fn as_policy_output(self: Arc<Self>) -> Option<Arc<dyn PolicyOutputPlugin>> {
        None
    }
}

/// Produces envelopes from an external source with no input envelope.
#[async_trait]
pub trait OriginPlugin: Plugin {
    async fn discover(&self, session: &Session, emit: &dyn Emit) -> Result<(), PluginError>;
}

/// Consumes envelopes and re-emits derived ones, selectively.
#[async_trait]
pub trait IntermediatePlugin: Plugin {
    /// Only envelopes whose kind matches one of these reach [`Self::accept`].
    fn accepts(&self) -> Vec<InterestPattern>;

    async fn accept(&self, envelope: &Envelope, emit: &dyn Emit) -> Result<(), PluginError>;
}

/// Consumes envelopes with no further emission.
#[async_trait]
pub trait TerminalPlugin: Plugin {
    async fn accept(&self, envelope: &Envelope) -> Result<(), PluginError>;
}

/// Renders a finished analysis document. Lives outside the envelope flow.
#[async_trait]
pub trait PolicyOutputPlugin: Plugin {
    async fn generate_report(&self, document: &Value) -> Result<(), PluginError>;
}

/// Does the plugin play `capability`?
pub fn implements(plugin: &Arc<dyn Plugin>, capability: Capability) -> bool {
    let probe = Arc::clone(plugin);
    match capability {
        Capability::Origin => probe.as_origin().is_some(),
        Capability::Intermediate => probe.as_intermediate().is_some(),
        Capability::Terminal => probe.as_terminal().is_some(),
        Capability::PolicyOutput => probe.as_policy_output().is_some(),
    }
}
