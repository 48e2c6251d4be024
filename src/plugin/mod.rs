pub mod manager;

pub use manager::{LoadError, PluginManager};
