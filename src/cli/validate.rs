use clap::Args;
use tracing::warn;

use super::CliContext;
use cloudsweep::{
    config::BackendType,
    fifo::nats::NatsSettings,
};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Also fail when a layer names a plugin this binary does not ship
    #[arg(long)]
    pub strict: bool,
}

pub async fn execute(args: ValidateArgs, context: &CliContext) -> anyhow::Result<()> {
    let config = context.load_config()?;

    for (name, fifo) in &config.fifos {
        if fifo.backend == BackendType::Distributed {
            NatsSettings::from_config(name, fifo)?;
        }
    }

    let registry = context.registry();
    let known = registry.ids();
    let mut unknown = Vec::new();
    for (layer, layer_config) in config.enabled_layers() {
        for id in layer_config.plugin_ids() {
            if !known.contains(&id) {
                warn!("layer `{}` names unknown plugin `{}`", layer, id);
                unknown.push(format!("{layer}/{id}"));
            }
        }
    }
    if args.strict && !unknown.is_empty() {
        anyhow::bail!("unknown plugins: {}", unknown.join(", "));
    }
    if config.has_wiring_cycle() {
        println!("note: fifo wiring contains a cycle");
    }

    println!(
        "{} is valid: {} layers ({} enabled), {} fifos, {} plugin sections",
        context.config_path.display(),
        config.layers.len(),
        config.enabled_layers().count(),
        config.fifos.len(),
        config.plugins.len()
    );
    Ok(())
}
