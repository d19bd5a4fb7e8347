//! The remote filesystem as the transfer engine and shell see it.

use std::future::Future;
use std::sync::Arc;

use russh_sftp::client::SftpSession;
use russh_sftp::client::fs::File;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error};

use crate::error::{AppError, Result};
use crate::ssh::hop::RusshTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
    /// Devices, sockets, pipes.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    /// Kind of the entry itself; symlinks are not followed.
    pub kind: EntryKind,
    pub size: u64,
    pub permissions: u32,
    pub mtime: u64,
}

/// Result of a stat that follows symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    pub kind: EntryKind,
    pub size: u64,
}

impl RemoteStat {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

pub trait RemoteFs: Send + Sync + 'static {
    type Reader: AsyncRead + Send + Unpin + 'static;
    type Writer: AsyncWrite + Send + Unpin + 'static;

    /// The server's own resolution of `path` to an absolute form.
    fn canonicalize(&self, path: &str) -> impl Future<Output = Result<String>> + Send;

    fn stat(&self, path: &str) -> impl Future<Output = Result<RemoteStat>> + Send;

    /// Directory entries, excluding `.` and `..`.
    fn read_dir(&self, path: &str) -> impl Future<Output = Result<Vec<RemoteEntry>>> + Send;

    fn open(&self, path: &str) -> impl Future<Output = Result<Self::Reader>> + Send;

    /// Create or truncate `path` for writing.
    fn create(&self, path: &str) -> impl Future<Output = Result<Self::Writer>> + Send;

    fn create_dir(&self, path: &str) -> impl Future<Output = Result<()>> + Send;

    fn remove_file(&self, path: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Create `path` and any missing parents, one component at a time.
pub async fn create_dir_all<F: RemoteFs + ?Sized>(fs: &F, path: &str) -> Result<()> {
    let mut prefix = String::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        prefix.push('/');
        prefix.push_str(part);
        match fs.stat(&prefix).await {
            Ok(st) if st.is_dir() => continue,
            Ok(_) => return Err(AppError::NotADirectory(prefix)),
            Err(_) => {
                debug!("creating remote directory {}", prefix);
                fs.create_dir(&prefix).await?;
            }
        }
    }
    Ok(())
}

/// Start the `sftp` subsystem on the target transport.
pub async fn open_sftp(transport: &RusshTransport) -> Result<SftpSession> {
    let channel = transport.handle().channel_open_session().await?;
    channel.request_subsystem(true, "sftp").await?;
    SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| AppError::SftpError(format!("SFTP session creation failed: {e}")))
}

/// [`RemoteFs`] backed by a `russh_sftp` session.
#[derive(Clone)]
pub struct SftpRemoteFs {
    session: Arc<SftpSession>,
}

impl SftpRemoteFs {
    pub fn new(session: Arc<SftpSession>) -> Self {
        Self { session }
    }
}

fn sftp_err(op: &str, path: &str, e: impl std::fmt::Display) -> AppError {
    AppError::SftpError(format!("{op} {path}: {e}"))
}

impl RemoteFs for SftpRemoteFs {
    type Reader = File;
    type Writer = File;

    async fn canonicalize(&self, path: &str) -> Result<String> {
        self.session
            .canonicalize(path)
            .await
            .map_err(|e| sftp_err("realpath", path, e))
    }

    async fn stat(&self, path: &str) -> Result<RemoteStat> {
        let attrs = self
            .session
            .metadata(path)
            .await
            .map_err(|e| sftp_err("stat", path, e))?;
        let kind = if attrs.is_dir() {
            EntryKind::Dir
        } else if attrs.is_regular() {
            EntryKind::File
        } else {
            EntryKind::Other
        };
        Ok(RemoteStat {
            kind,
            size: attrs.size.unwrap_or(0),
        })
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let entries = self.session.read_dir(path).await.map_err(|e| {
            error!("SFTP read_dir failed for '{}': {}", path, e);
            sftp_err("read dir", path, e)
        })?;

        let mut out = Vec::new();
        for entry in entries {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let file_type = entry.file_type();
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Dir
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };
            let attrs = entry.metadata();
            out.push(RemoteEntry {
                name,
                kind,
                size: attrs.size.unwrap_or(0),
                permissions: attrs.permissions.unwrap_or(0),
                mtime: u64::from(attrs.mtime.unwrap_or(0)),
            });
        }
        debug!("SFTP read_dir {}: {} entries", path, out.len());
        Ok(out)
    }

    async fn open(&self, path: &str) -> Result<File> {
        self.session
            .open(path)
            .await
            .map_err(|e| sftp_err("open remote", path, e))
    }

    async fn create(&self, path: &str) -> Result<File> {
        self.session
            .create(path)
            .await
            .map_err(|e| sftp_err("create remote", path, e))
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        self.session
            .create_dir(path)
            .await
            .map_err(|e| sftp_err("mkdir", path, e))
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        self.session
            .remove_file(path)
            .await
            .map_err(|e| sftp_err("remove", path, e))
    }
}
