pub mod app;
pub mod config;
mod error;
mod search_state;
pub mod sftp;
pub mod ssh;
pub mod terminal;
pub mod ui;
mod utils;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{ConfigManager, HostDescriptor};
pub use error::{AppError, Result};
pub use search_state::SearchState;
pub use utils::{expand_tilde, init_panic_hook, init_tracing};
