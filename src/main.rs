use std::{
    path::{Path, PathBuf},
    process,
};

use clap::Parser;
use cloudsweep::{
    config::load_env_file,
    logger::{LogConfig, init_tracing},
};
use tracing::{error, info, warn};

mod cli;

use cli::{Cli, CliContext};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The working directory's `.env` may set CLOUDSWEEP_CONFIG, so it is read
    // before the pipeline path is resolved. Variables already set are kept.
    let mut env_files = vec![(PathBuf::from(".env"), load_env_file(Path::new(".env")))];
    let context = CliContext::new(cli.global.config.clone());
    if let Some(dir) = context.config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        let beside_config = dir.join(".env");
        let outcome = load_env_file(&beside_config);
        env_files.push((beside_config, outcome));
    }

    let log_config = LogConfig::new(
        cli.global.log_level.clone(),
        cli.global.log_dir.clone(),
        cli.global.otel_endpoint.clone(),
    );
    let telemetry = match init_tracing(&log_config) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("could not set up logging: {e:#}");
            process::exit(1);
        }
    };
    for (path, outcome) in env_files {
        match outcome {
            Ok(true) => info!("Loaded .env from {}", path.display()),
            Ok(false) => {}
            Err(e) => warn!("could not load .env from {}: {e}", path.display()),
        }
    }

    let outcome = cli::execute(&context, cli.command).await;
    telemetry.shutdown();

    if let Err(e) = outcome {
        error!("{:#}", e);
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}
