//! Ordered chain of live transports, index 0 dialed directly and each later
//! hop tunneled through the one before it.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::config::HostDescriptor;
use crate::error::{AppError, Result};

/// An authenticated connection to one host.
pub trait Transport: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens transports, either from the local machine or through an existing one.
pub trait HopConnector: Send + Sync {
    type Transport: Transport;

    fn connect_direct(
        &self,
        host: &HostDescriptor,
    ) -> impl Future<Output = Result<Self::Transport>> + Send;

    fn connect_via(
        &self,
        via: &Self::Transport,
        host: &HostDescriptor,
    ) -> impl Future<Output = Result<Self::Transport>> + Send;
}

pub struct TransportChain<T: Transport> {
    clients: Mutex<Vec<Arc<T>>>,
}

impl<T: Transport> TransportChain<T> {
    /// Dial every hop in order. On failure at hop `i`, the hops already open
    /// are closed target-first and the error names hop `i`.
    pub async fn connect<C>(connector: &C, hops: &[HostDescriptor]) -> Result<Self>
    where
        C: HopConnector<Transport = T>,
    {
        if hops.is_empty() {
            return Err(AppError::ConfigError("empty connection chain".to_string()));
        }

        let mut opened: Vec<Arc<T>> = Vec::with_capacity(hops.len());
        for (index, host) in hops.iter().enumerate() {
            let result = match opened.last() {
                None => {
                    info!("hop {}: dialing {} directly", index + 1, host.host_port());
                    connector.connect_direct(host).await
                }
                Some(prev) => {
                    info!(
                        "hop {}: dialing {} through {}",
                        index + 1,
                        host.host_port(),
                        prev.name()
                    );
                    connector.connect_via(prev, host).await
                }
            };

            match result {
                Ok(transport) => opened.push(Arc::new(transport)),
                Err(source) => {
                    warn!("hop {} ({}) failed: {}", index + 1, host.name, source);
                    if let Err(e) = close_reverse(std::mem::take(&mut opened)).await {
                        warn!("cleanup after failed hop: {}", e);
                    }
                    return Err(AppError::HopFailed {
                        index,
                        name: host.name.clone(),
                        source: Box::new(source),
                    });
                }
            }
        }

        Ok(Self {
            clients: Mutex::new(opened),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<T>>> {
        self.clients.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// The last hop, used to open sessions and file clients.
    pub fn target(&self) -> Result<Arc<T>> {
        self.lock().last().cloned().ok_or(AppError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        !self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every hop, target first. Individual failures are collected, not
    /// short-circuited. Closing an already closed chain is a no-op.
    pub async fn close(&self) -> Result<()> {
        let clients = std::mem::take(&mut *self.lock());
        close_reverse(clients).await
    }
}

async fn close_reverse<T: Transport>(clients: Vec<Arc<T>>) -> Result<()> {
    let mut errors = Vec::new();
    for client in clients.iter().rev() {
        debug!("closing {}", client.name());
        if let Err(e) = client.close().await {
            errors.push(format!("{}: {}", client.name(), e));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::ChainClose(errors))
    }
}
