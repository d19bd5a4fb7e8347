//! Test doubles for the SFTP layer.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::UNIX_EPOCH;

use tempfile::TempDir;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

use super::paths::clean_remote;
use super::remote_fs::{EntryKind, RemoteEntry, RemoteFs, RemoteStat};
use crate::error::{AppError, Result};

/// Largest chunk a [`FakeReader`] hands out per read.
const READ_CHUNK: usize = 16 * 1024;

pub const FAKE_HOME: &str = "/home/u";

/// A [`RemoteFs`] rooted in a temporary directory.
pub struct FakeRemoteFs {
    root: TempDir,
    symlinks: Mutex<HashMap<String, String>>,
    fail_open: Mutex<HashSet<String>>,
    trips: Mutex<HashMap<String, CancellationToken>>,
    stalls: Mutex<HashSet<String>>,
}

impl FakeRemoteFs {
    pub fn new() -> Self {
        let fs = Self {
            root: TempDir::new().unwrap(),
            symlinks: Mutex::new(HashMap::new()),
            fail_open: Mutex::new(HashSet::new()),
            trips: Mutex::new(HashMap::new()),
            stalls: Mutex::new(HashSet::new()),
        };
        fs.mkdir(FAKE_HOME);
        fs
    }

    /// Where a remote path lives on the local disk.
    pub fn local(&self, path: &str) -> PathBuf {
        self.root.path().join(path.trim_start_matches('/'))
    }

    pub fn mkdir(&self, path: &str) {
        std::fs::create_dir_all(self.local(path)).unwrap();
    }

    pub fn write(&self, path: &str, data: &[u8]) {
        let local = self.local(path);
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(local, data).unwrap();
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        std::fs::read(self.local(path)).ok()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.local(path).exists()
    }

    /// `link` canonicalizes to `target`. On unix a real symlink is created
    /// too, so listings report it.
    pub fn add_symlink(&self, link: &str, target: &str) {
        #[cfg(unix)]
        std::os::unix::fs::symlink(self.local(target), self.local(link)).unwrap();
        self.symlinks
            .lock()
            .unwrap()
            .insert(link.to_string(), target.to_string());
    }

    pub fn fail_open(&self, path: &str) {
        self.fail_open.lock().unwrap().insert(path.to_string());
    }

    /// Cancel `token` on the first read from `path`.
    pub fn trip_on_read(&self, path: &str, token: CancellationToken) {
        self.trips.lock().unwrap().insert(path.to_string(), token);
    }

    /// Reads from `path` never complete.
    pub fn stall_reads(&self, path: &str) {
        self.stalls.lock().unwrap().insert(path.to_string());
    }

    fn missing(op: &str, path: &str, e: std::io::Error) -> AppError {
        AppError::SftpError(format!("{op} {path}: {e}"))
    }
}

impl RemoteFs for FakeRemoteFs {
    type Reader = FakeReader;
    type Writer = tokio::fs::File;

    async fn canonicalize(&self, path: &str) -> Result<String> {
        let mut resolved = if path.starts_with('/') {
            clean_remote(path)
        } else {
            clean_remote(&format!("{FAKE_HOME}/{path}"))
        };
        let links = self.symlinks.lock().unwrap().clone();
        for (link, target) in links {
            if resolved == link {
                resolved = target;
                break;
            }
            if let Some(rest) = resolved.strip_prefix(&format!("{link}/")) {
                resolved = format!("{target}/{rest}");
                break;
            }
        }
        if !self.local(&resolved).exists() {
            return Err(AppError::SftpError(format!("realpath {path}: no such file")));
        }
        Ok(resolved)
    }

    async fn stat(&self, path: &str) -> Result<RemoteStat> {
        let metadata = tokio::fs::metadata(self.local(path))
            .await
            .map_err(|e| Self::missing("stat", path, e))?;
        let kind = if metadata.is_dir() {
            EntryKind::Dir
        } else if metadata.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };
        Ok(RemoteStat {
            kind,
            size: metadata.len(),
        })
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let mut dir = tokio::fs::read_dir(self.local(path))
            .await
            .map_err(|e| Self::missing("read dir", path, e))?;
        let mut out = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let metadata = tokio::fs::symlink_metadata(entry.path()).await?;
            let file_type = metadata.file_type();
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Dir
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };
            #[cfg(unix)]
            let permissions = std::os::unix::fs::PermissionsExt::mode(&metadata.permissions());
            #[cfg(not(unix))]
            let permissions = 0o644;
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs());
            out.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
                size: metadata.len(),
                permissions,
                mtime,
            });
        }
        Ok(out)
    }

    async fn open(&self, path: &str) -> Result<FakeReader> {
        if self.fail_open.lock().unwrap().contains(path) {
            return Err(AppError::SftpError(format!(
                "open remote {path}: permission denied"
            )));
        }
        let data = tokio::fs::read(self.local(path))
            .await
            .map_err(|e| Self::missing("open remote", path, e))?;
        let trip = self.trips.lock().unwrap().remove(path);
        let stalled = self.stalls.lock().unwrap().contains(path);
        Ok(FakeReader {
            data,
            pos: 0,
            trip,
            stalled,
        })
    }

    async fn create(&self, path: &str) -> Result<tokio::fs::File> {
        tokio::fs::File::create(self.local(path))
            .await
            .map_err(|e| Self::missing("create remote", path, e))
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        tokio::fs::create_dir(self.local(path))
            .await
            .map_err(|e| Self::missing("mkdir", path, e))
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        tokio::fs::remove_file(self.local(path))
            .await
            .map_err(|e| Self::missing("remove", path, e))
    }
}

/// In-memory file contents served in small chunks.
pub struct FakeReader {
    data: Vec<u8>,
    pos: usize,
    trip: Option<CancellationToken>,
    stalled: bool,
}

impl AsyncRead for FakeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.stalled {
            return Poll::Pending;
        }
        if let Some(token) = this.trip.take() {
            token.cancel();
        }
        let remaining = &this.data[this.pos..];
        let n = remaining.len().min(buf.remaining()).min(READ_CHUNK);
        buf.put_slice(&remaining[..n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

/// Cloneable in-memory sink for captured shell output.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
