use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::Disconnect;
use tokio::time::timeout;
use tracing::{debug, info};

use super::auth::{self, agent_available, default_key_locations, load_private_key};
use super::chain::{HopConnector, Transport};
use super::handler::ClientHandler;
use crate::config::HostDescriptor;
use crate::error::{AppError, Result};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// One authenticated russh connection.
pub struct RusshTransport {
    name: String,
    handle: Handle<ClientHandler>,
}

impl RusshTransport {
    pub fn handle(&self) -> &Handle<ClientHandler> {
        &self.handle
    }
}

impl Transport for RusshTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn close(&self) -> Result<()> {
        if self.handle.is_closed() {
            return Ok(());
        }
        self.handle
            .disconnect(Disconnect::ByApplication, "", "")
            .await?;
        Ok(())
    }
}

/// Dials hops with russh, tunneling later hops through a `direct-tcpip`
/// channel on the previous one.
pub struct RusshConnector {
    config: Arc<client::Config>,
    default_keys: Vec<PathBuf>,
    agent_available: bool,
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl RusshConnector {
    pub fn new() -> Self {
        let config = client::Config {
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
            default_keys: default_key_locations(),
            agent_available: agent_available(),
        }
    }

    async fn finish(
        &self,
        host: &HostDescriptor,
        mut handle: Handle<ClientHandler>,
    ) -> Result<RusshTransport> {
        let methods = auth::resolve_auth_methods(
            host,
            &self.default_keys,
            self.agent_available,
            load_private_key,
        );
        debug!(
            "auth plan for {}: {:?}",
            host.name,
            methods.iter().map(|m| m.kind()).collect::<Vec<_>>()
        );

        if let Err(e) = auth::authenticate(&mut handle, &host.user, methods).await {
            let _ = handle.disconnect(Disconnect::ByApplication, "", "").await;
            return Err(e);
        }

        info!("connected to {} ({})", host.name, host.host_port());
        Ok(RusshTransport {
            name: host.name.clone(),
            handle,
        })
    }
}

impl HopConnector for RusshConnector {
    type Transport = RusshTransport;

    async fn connect_direct(&self, host: &HostDescriptor) -> Result<RusshTransport> {
        let addr = host.host_port();
        let handle = timeout(
            CONNECT_TIMEOUT,
            client::connect(
                Arc::clone(&self.config),
                (host.host.as_str(), host.port),
                ClientHandler::new(&addr),
            ),
        )
        .await
        .map_err(|_| AppError::SshConnectionError(format!("dial {addr}: timed out")))?
        .map_err(|e| AppError::SshConnectionError(format!("dial {addr}: {e}")))?;

        self.finish(host, handle).await
    }

    async fn connect_via(
        &self,
        via: &RusshTransport,
        host: &HostDescriptor,
    ) -> Result<RusshTransport> {
        let addr = host.host_port();
        let channel = via
            .handle
            .channel_open_direct_tcpip(host.host.as_str(), u32::from(host.port), "127.0.0.1", 0)
            .await
            .map_err(|e| {
                AppError::SshConnectionError(format!("dial {addr} through {}: {e}", via.name))
            })?;

        let handle = timeout(
            CONNECT_TIMEOUT,
            client::connect_stream(
                Arc::clone(&self.config),
                channel.into_stream(),
                ClientHandler::new(&addr),
            ),
        )
        .await
        .map_err(|_| AppError::SshConnectionError(format!("handshake with {addr}: timed out")))?
        .map_err(|e| AppError::SshConnectionError(format!("handshake with {addr}: {e}")))?;

        self.finish(host, handle).await
    }
}
