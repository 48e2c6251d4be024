use std::sync::Mutex;

use async_trait::async_trait;
use sweep_plugin::{Emit, EmitError, Envelope};

/// Collects whatever a plugin emits, stamping provenance the way the host does.
pub struct CollectingEmit {
    plugin_id: String,
    pub emitted: Mutex<Vec<Envelope>>,
}

impl CollectingEmit {
    pub fn new(plugin_id: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            emitted: Mutex::new(Vec::new()),
        }
    }

    pub fn take(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.emitted.lock().unwrap())
    }
}

#[async_trait]
impl Emit for CollectingEmit {
    async fn emit(&self, envelope: Envelope) -> Result<(), EmitError> {
        self.emitted
            .lock()
            .unwrap()
            .push(envelope.with_hop(&self.plugin_id));
        Ok(())
    }
}
