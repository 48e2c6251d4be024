use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Args;
use serde_json::Value;

use super::CliContext;
use cloudsweep::apps::report_dispatcher;

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Finished analysis document (JSON)
    #[arg(long)]
    pub document: PathBuf,
}

pub async fn execute(args: ReportArgs, context: &CliContext) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(&args.document)
        .await
        .with_context(|| format!("reading {}", args.document.display()))?;
    let document: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", args.document.display()))?;

    let config = context.load_config()?;
    let (plugins, dispatcher) = report_dispatcher(&config, context.registry()).await?;
    let summary = dispatcher.dispatch(&document).await;
    plugins.shutdown_all().await;

    if summary.delivered.is_empty() && !summary.failed.is_empty() {
        bail!("every policy-output plugin failed: {}", summary.failed.join(", "));
    }
    Ok(())
}
