use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use serde_json::Value;
use sweep_plugin::PolicyOutputPlugin;
use tracing::{error, info, warn};

use crate::{layer::panic_message, plugin::PluginManager};

/// Result of handing one document to every policy-output plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

/// Hands finished analysis documents to the policy-output plugins.
pub struct ReportDispatcher {
    outputs: Vec<Arc<dyn PolicyOutputPlugin>>,
}

impl ReportDispatcher {
    pub fn new(plugins: &PluginManager) -> Self {
        Self {
            outputs: plugins.policy_outputs(),
        }
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Every plugin gets the document, whatever happened to the previous one.
    pub async fn dispatch(&self, document: &Value) -> DispatchSummary {
        if self.outputs.is_empty() {
            warn!("no policy-output plugins loaded; report discarded");
        }
        let mut summary = DispatchSummary::default();
        for output in &self.outputs {
            let id = output.id().to_string();
            match AssertUnwindSafe(output.generate_report(document)).catch_unwind().await {
                Ok(Ok(())) => {
                    info!(plugin = %id, "report generated");
                    summary.delivered.push(id);
                }
                Ok(Err(e)) => {
                    error!(plugin = %id, "generate_report failed: {}", e);
                    summary.failed.push(id);
                }
                Err(panic) => {
                    error!(plugin = %id, "generate_report panicked: {}", panic_message(panic.as_ref()));
                    summary.failed.push(id);
                }
            }
        }
        summary
    }
}
