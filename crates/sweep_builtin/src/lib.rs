//! Reference plugins compiled into the `cloudsweep` binary.
//!
//! | id                 | capability    |
//! |--------------------|---------------|
//! | `static-inventory` | origin        |
//! | `tagger`           | intermediate  |
//! | `stdout`           | terminal      |
//! | `jsonl-file`       | terminal      |
//! | `json-report`      | policy output |

pub mod inventory;
pub mod jsonl;
pub mod report;
pub mod stdout;
pub mod tagger;

#[cfg(test)]
pub(crate) mod test_util;

use sweep_plugin::PluginRegistry;

pub use inventory::StaticInventory;
pub use jsonl::JsonlFile;
pub use report::JsonReport;
pub use stdout::Stdout;
pub use tagger::Tagger;

/// Registry holding one fresh instance of every built-in plugin.
pub fn registry() -> PluginRegistry {
    PluginRegistry::new()
        .with(StaticInventory::default())
        .with(Tagger::default())
        .with(Stdout::default())
        .with(JsonlFile::default())
        .with(JsonReport::default())
}
