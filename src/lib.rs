//! cloudsweep: a layered discovery pipeline.
//!
//! Origin layers enumerate resources, intermediate layers transform and
//! enrich them, terminal layers persist or print them. Layers talk through
//! named fifos and drive compiled-in plugins; see [`apps::App`] for how the
//! pieces are assembled and [`orchestrator::Orchestrator`] for how a scan runs.

pub mod apps;
pub mod config;
pub mod fifo;
pub mod layer;
pub mod logger;
pub mod orchestrator;
pub mod plugin;
pub mod report;
pub mod schema;

#[cfg(test)]
mod test_support;
