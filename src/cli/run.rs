use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tokio::signal;
use tracing::{info, warn};

use super::CliContext;
use cloudsweep::apps::App;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Write the scan summary as JSON to this file
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

pub async fn execute(args: RunArgs, context: &CliContext) -> anyhow::Result<()> {
    let config = context.load_config()?;
    let app = App::bootstrap(&config, context.registry()).await?;

    let orchestrator = app.orchestrator();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping the scan");
            orchestrator.shutdown();
        }
    });

    let report = app.scan().await?;
    info!(
        "session {} done: {} layers in {:.2}s",
        report.session.id(),
        report.layers.len(),
        report.duration.as_secs_f64()
    );

    if let Some(path) = args.summary {
        let rendered = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(&path, rendered)
            .await
            .with_context(|| format!("writing scan summary to {}", path.display()))?;
    }
    Ok(())
}
