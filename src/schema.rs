// src/schema.rs

use std::{fs, path::Path};

use anyhow::{Context, Error};
use schemars::schema_for;
use serde_json::Value;
use sweep_plugin::Envelope;

use crate::config::PipelineConfig;

/// JSON Schema of the pipeline document.
pub fn pipeline_schema() -> Value {
    schema_for!(PipelineConfig).to_value()
}

/// JSON Schema of the envelope wire shape used by distributed fifos.
pub fn envelope_schema() -> Value {
    schema_for!(Envelope).to_value()
}

/// Write `pipeline.schema.json` and `envelope.schema.json` into `out_dir`.
pub fn write_schema(out_dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    for (file, schema) in [
        ("pipeline.schema.json", pipeline_schema()),
        ("envelope.schema.json", envelope_schema()),
    ] {
        let path = out_dir.join(file);
        fs::write(&path, serde_json::to_string_pretty(&schema)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}
