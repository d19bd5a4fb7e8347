use russh::client;
use russh::keys::ssh_key::{self, HashAlg};
use tracing::debug;

use crate::error::AppError;

/// Client callbacks for one hop.
///
/// Every server key is accepted: the original tool never verified host keys
/// and this keeps that behaviour. The fingerprint is logged for auditing.
pub struct ClientHandler {
    host: String,
}

impl ClientHandler {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl client::Handler for ClientHandler {
    type Error = AppError;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        debug!(
            "accepting host key for {}: {}",
            self.host,
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}
