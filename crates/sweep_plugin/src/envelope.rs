use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlates every envelope produced during one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Session {
    id: String,
    started_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
        }
    }

    /// Rebuild a session around a known id, e.g. one read back from a broker.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// The unit of data moving through the pipeline.
///
/// Envelopes are never mutated in place. A plugin re-emitting data builds a
/// child with [`Envelope::derive`], and the emit path records the emitting
/// plugin with [`Envelope::with_hop`], so `plugin_path` only ever grows by one
/// entry per hop.
///
/// Wire shape: `{ "payload": .., "pluginPath": [..], "sessionId": "..", "kind": ".." }`.
/// `kind` is optional on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    payload: Value,
    #[serde(default)]
    plugin_path: Vec<String>,
    session_id: String,
    #[serde(default)]
    kind: String,
}

impl Envelope {
    /// A fresh envelope with empty provenance, as an origin plugin creates it.
    pub fn new(session: &Session, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            payload,
            plugin_path: Vec::new(),
            session_id: session.id().to_string(),
            kind: kind.into(),
        }
    }

    /// A child envelope carrying this envelope's provenance and session.
    pub fn derive(&self, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            payload,
            plugin_path: self.plugin_path.clone(),
            session_id: self.session_id.clone(),
            kind: kind.into(),
        }
    }

    /// Same envelope with `plugin_id` appended to its provenance.
    pub fn with_hop(mut self, plugin_id: &str) -> Self {
        self.plugin_path.push(plugin_id.to_string());
        self
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn plugin_path(&self) -> &[String] {
        &self.plugin_path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The plugin that emitted this envelope last, if any.
    pub fn last_hop(&self) -> Option<&str> {
        self.plugin_path.last().map(String::as_str)
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
