//! Per-hop authentication: which methods to offer, in which order.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::client::Handle;
use russh::keys::agent::client::{AgentClient, AgentStream};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg, ssh_key};
use russh::{AgentAuthError, CryptoVec, Signer};
use tracing::{debug, info, warn};

use super::handler::ClientHandler;
use crate::config::HostDescriptor;
use crate::error::{AppError, Result};

/// Keys tried, in order, when a host names no key of its own.
const DEFAULT_KEY_NAMES: [&str; 4] = ["id_ed25519", "id_rsa", "id_ecdsa", "id_dsa"];

pub fn default_key_locations() -> Vec<PathBuf> {
    match dirs::home_dir() {
        Some(home) => DEFAULT_KEY_NAMES
            .iter()
            .map(|name| home.join(".ssh").join(name))
            .collect(),
        None => Vec::new(),
    }
}

pub fn agent_available() -> bool {
    cfg!(unix) && std::env::var_os("SSH_AUTH_SOCK").is_some_and(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod<K = PrivateKey> {
    PublicKey { path: PathBuf, key: K },
    Password(String),
    Agent,
}

impl<K> AuthMethod<K> {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthMethod::PublicKey { .. } => "publickey",
            AuthMethod::Password(_) => "password",
            AuthMethod::Agent => "agent",
        }
    }
}

/// Ordered methods for `host`: an explicit key, else the first loadable
/// default key, then the password, then the agent. A key that fails to load
/// is logged and skipped.
///
/// Unlike sshw, an explicit `keypath` that cannot be loaded still lets the
/// default keys be tried; sshw only consults them when no `keypath` is set.
pub fn resolve_auth_methods<K>(
    host: &HostDescriptor,
    default_keys: &[PathBuf],
    agent_available: bool,
    load_key: impl Fn(&Path) -> Result<K>,
) -> Vec<AuthMethod<K>> {
    let mut methods = Vec::new();

    let explicit = host.key_path.as_deref().and_then(|path| {
        let path = PathBuf::from(path);
        match load_key(&path) {
            Ok(key) => Some(AuthMethod::PublicKey { path, key }),
            Err(e) => {
                warn!("key {} for {} unusable: {}", path.display(), host.name, e);
                None
            }
        }
    });

    let key = explicit.or_else(|| {
        default_keys.iter().find_map(|path| {
            if !path.exists() {
                return None;
            }
            match load_key(path) {
                Ok(key) => Some(AuthMethod::PublicKey {
                    path: path.clone(),
                    key,
                }),
                Err(e) => {
                    debug!("skipping default key {}: {}", path.display(), e);
                    None
                }
            }
        })
    });
    methods.extend(key);

    if let Some(password) = host.password.as_ref().filter(|p| !p.is_empty()) {
        methods.push(AuthMethod::Password(password.clone()));
    }

    if agent_available {
        methods.push(AuthMethod::Agent);
    }

    methods
}

pub fn load_private_key(path: &Path) -> Result<PrivateKey> {
    Ok(russh::keys::load_secret_key(path, None)?)
}

/// One authentication attempt against a server.
pub trait AuthAttempt<K = PrivateKey>: Send {
    /// `Ok(true)` when accepted, `Ok(false)` when rejected.
    fn try_method(
        &mut self,
        user: &str,
        method: AuthMethod<K>,
    ) -> impl Future<Output = Result<bool>> + Send;
}

impl AuthAttempt for Handle<ClientHandler> {
    async fn try_method(&mut self, user: &str, method: AuthMethod) -> Result<bool> {
        match method {
            AuthMethod::PublicKey { path, key } => {
                debug!("offering key {}", path.display());
                let hash_alg = self.best_supported_rsa_hash().await?.flatten();
                let result = self
                    .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
                    .await?;
                Ok(result.success())
            }
            AuthMethod::Password(password) => {
                let result = self.authenticate_password(user, password).await?;
                Ok(result.success())
            }
            AuthMethod::Agent => authenticate_with_agent(self, user).await,
        }
    }
}

/// Try each method in order until the server accepts one. A method that
/// errors or is rejected falls through to the next.
pub async fn authenticate<K, A>(attempt: &mut A, user: &str, methods: Vec<AuthMethod<K>>) -> Result<()>
where
    K: Send,
    A: AuthAttempt<K>,
{
    if methods.is_empty() {
        return Err(AppError::AuthenticationError(
            "no authentication methods available".to_string(),
        ));
    }

    let mut tried = Vec::with_capacity(methods.len());
    for method in methods {
        let kind = method.kind();
        tried.push(kind);
        match attempt.try_method(user, method).await {
            Ok(true) => {
                info!("authenticated as {} via {}", user, kind);
                return Ok(());
            }
            Ok(false) => debug!("{} rejected for {}", kind, user),
            Err(e) => warn!("{} failed for {}: {}", kind, user, e),
        }
    }

    Err(AppError::AuthenticationError(format!(
        "all methods exhausted (tried: {})",
        tried.join(", ")
    )))
}

// Owns the key before the async block so the signing future stays Send.
struct AgentSigner<'a> {
    agent: &'a mut AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>,
}

impl Signer for AgentSigner<'_> {
    type Error = AgentAuthError;

    fn auth_publickey_sign(
        &mut self,
        key: &ssh_key::PublicKey,
        hash_alg: Option<ssh_key::HashAlg>,
        to_sign: CryptoVec,
    ) -> impl Future<Output = std::result::Result<CryptoVec, Self::Error>> + Send {
        let key = key.clone();
        async move {
            self.agent
                .sign_request(&key, hash_alg, to_sign)
                .await
                .map_err(Into::into)
        }
    }
}

#[cfg(unix)]
async fn authenticate_with_agent(handle: &mut Handle<ClientHandler>, user: &str) -> Result<bool> {
    let mut agent = AgentClient::connect_env()
        .await
        .map_err(|e| AppError::AuthenticationError(format!("connect to agent: {e}")))?
        .dynamic();

    let identities = agent
        .request_identities()
        .await
        .map_err(|e| AppError::AuthenticationError(format!("list agent keys: {e}")))?;

    for key in identities {
        debug!("trying agent key {}", key.comment());
        let result = handle
            .authenticate_publickey_with(user, key, None, &mut AgentSigner { agent: &mut agent })
            .await;
        match result {
            Ok(r) if r.success() => return Ok(true),
            Ok(_) => {}
            Err(e) => warn!("agent signing failed: {}", e),
        }
    }
    Ok(false)
}

#[cfg(not(unix))]
async fn authenticate_with_agent(_handle: &mut Handle<ClientHandler>, _user: &str) -> Result<bool> {
    Ok(false)
}
