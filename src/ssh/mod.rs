//! Secure transport: hop-by-hop connection building and interactive shells.

pub mod auth;
pub mod chain;
pub mod coordinator;
pub mod handler;
pub mod hop;
pub mod session;

pub use chain::{HopConnector, Transport, TransportChain};
pub use coordinator::{CoordinatorTimeouts, SessionCoordinator, SessionOutcome, SessionTrigger};
pub use handler::ClientHandler;
pub use hop::{RusshConnector, RusshTransport};
pub use session::{RemoteShell, SessionCommand, SessionControl, SessionExit};
