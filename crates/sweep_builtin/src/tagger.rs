use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use sweep_plugin::{
    Configure, Emit, Envelope, IntermediatePlugin, InterestPattern, Plugin, PluginError,
    PluginLogger, PluginSettings,
};

fn default_accepts() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_field() -> String {
    "tags".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaggerConfig {
    /// Kinds this plugin wants to see.
    #[serde(default = "default_accepts")]
    pub accepts: Vec<String>,
    /// Payload field the tags are merged into.
    #[serde(default = "default_field")]
    pub field: String,
    #[serde(default)]
    pub tags: Map<String, Value>,
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            accepts: default_accepts(),
            field: default_field(),
            tags: Map::new(),
        }
    }
}

impl PluginSettings for TaggerConfig {
    fn fallback() -> Option<Self> {
        Some(Self::default())
    }
}

/// Enrichment step: merges a fixed set of tags into every matching payload
/// and re-emits it. Existing tag values win over configured ones.
pub struct Tagger {
    accepts: Vec<InterestPattern>,
    field: String,
    tags: Map<String, Value>,
}

impl Default for Tagger {
    fn default() -> Self {
        Self {
            accepts: vec![InterestPattern::any()],
            field: default_field(),
            tags: Map::new(),
        }
    }
}

impl Tagger {
    fn tag(&self, payload: &Value) -> Value {
        let mut object = match payload {
            Value::Object(map) => map.clone(),
            other => {
                let mut wrapped = Map::new();
                wrapped.insert("value".to_string(), other.clone());
                wrapped
            }
        };
        let mut merged = self.tags.clone();
        if let Some(Value::Object(existing)) = object.get(&self.field) {
            for (k, v) in existing {
                merged.insert(k.clone(), v.clone());
            }
        }
        object.insert(self.field.clone(), Value::Object(merged));
        Value::Object(object)
    }
}

#[async_trait]
impl Plugin for Tagger {
    fn id(&self) -> &str {
        "tagger"
    }

    fn as_intermediate(self: Arc<Self>) -> Option<Arc<dyn IntermediatePlugin>> {
        Some(self)
    }
}

#[async_trait]
impl Configure for Tagger {
    type Config = TaggerConfig;

    async fn init(&mut self, config: TaggerConfig, logger: PluginLogger) -> Result<(), PluginError> {
        self.accepts = InterestPattern::parse_all(&config.accepts)
            .map_err(|e| PluginError::Other(format!("invalid accepts pattern: {e}")))?;
        self.field = config.field;
        self.tags = config.tags;
        logger.debug(&format!("accepting {:?}", self.accepts));
        Ok(())
    }
}

#[async_trait]
impl IntermediatePlugin for Tagger {
    fn accepts(&self) -> Vec<InterestPattern> {
        self.accepts.clone()
    }

    async fn accept(&self, envelope: &Envelope, emit: &dyn Emit) -> Result<(), PluginError> {
        let derived = envelope.derive(envelope.kind(), self.tag(envelope.payload()));
        emit.emit(derived).await?;
        Ok(())
    }
}
