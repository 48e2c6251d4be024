use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub mod plugins;
pub mod report;
pub mod run;
pub mod schema;
pub mod validate;

use cloudsweep::config::{PipelineConfig, resolve_config_path};
use report::ReportArgs;
use run::RunArgs;
use schema::SchemaArgs;
use sweep_plugin::PluginRegistry;
use validate::ValidateArgs;

#[derive(Parser, Debug)]
#[command(
    name = "cloudsweep",
    about = "Layered cloud discovery pipeline",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Pipeline file. Defaults to $CLOUDSWEEP_CONFIG, then ./cloudsweep.yaml
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter (e.g. error, warn, info, debug, trace, or `cloudsweep=debug`)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Also write logs to a daily-rolling file in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// OpenTelemetry OTLP/HTTP endpoint (e.g. http://localhost:4318)
    #[arg(long, global = true)]
    pub otel_endpoint: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one scan
    Run(RunArgs),

    /// Parse and check a pipeline file without running it
    Validate(ValidateArgs),

    /// List compiled-in plugins and their capabilities
    Plugins,

    /// Emit JSON-Schema for the pipeline file
    Schema(SchemaArgs),

    /// Hand a finished analysis document to the policy-output plugins
    Report(ReportArgs),
}

pub struct CliContext {
    pub config_path: PathBuf,
}

impl CliContext {
    pub fn new(explicit_config: Option<PathBuf>) -> Self {
        Self {
            config_path: resolve_config_path(explicit_config),
        }
    }

    pub fn load_config(&self) -> anyhow::Result<PipelineConfig> {
        Ok(PipelineConfig::from_path(&self.config_path)?)
    }

    /// Every plugin this binary ships.
    pub fn registry(&self) -> PluginRegistry {
        sweep_builtin::registry()
    }
}

pub async fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => run::execute(args, context).await,
        Commands::Validate(args) => validate::execute(args, context).await,
        Commands::Plugins => plugins::execute(context).await,
        Commands::Schema(args) => schema::execute(args, context).await,
        Commands::Report(args) => report::execute(args, context).await,
    }
}
