//! Host inventory: the YAML descriptor tree and the loader that reads it.

pub mod host;
pub mod manager;

pub use host::HostDescriptor;
pub use manager::{ConfigManager, default_config_paths};
