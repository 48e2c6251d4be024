use std::path::PathBuf;

use clap::Args;

use super::CliContext;
use cloudsweep::schema::{pipeline_schema, write_schema};

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Directory to write the schema files into. Prints the pipeline schema when absent
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub async fn execute(args: SchemaArgs, _context: &CliContext) -> anyhow::Result<()> {
    match args.out {
        Some(out_dir) => {
            write_schema(&out_dir)?;
            println!("Schemas written to {}", out_dir.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&pipeline_schema())?),
    }
    Ok(())
}
