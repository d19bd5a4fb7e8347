//! Terminal discipline ownership: raw/cooked transitions and resize relaying.

use std::future::Future;

use crate::error::Result;

pub mod discipline;
pub mod manager;
pub mod resize;

pub use discipline::{StdinTerminal, TerminalDiscipline};
pub use manager::{RestoreOnDrop, TerminalModeManager};

/// A remote session that can be bound to raw mode and told about window size changes.
pub trait ResizeSink: Clone + Send + Sync + 'static {
    fn id(&self) -> u64;

    fn resize(&self, cols: u16, rows: u16) -> impl Future<Output = Result<()>> + Send;
}
