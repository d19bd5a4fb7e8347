//! Recursive pre-scan for directory transfers.
//!
//! Produces a [`Manifest`] of regular files relative to the scanned root, in
//! BFS order with entries sorted by name within each directory. Symlinks,
//! devices, sockets and pipes are skipped on the source side.

use std::collections::VecDeque;
use std::path::Path;

use tracing::debug;

use super::paths::join_remote;
use super::remote_fs::{EntryKind, RemoteFs};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// `/`-separated path relative to the scanned root.
    pub rel_path: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub files: Vec<ScanEntry>,
    pub total_bytes: u64,
}

impl Manifest {
    fn push(&mut self, rel_path: String, size: u64) {
        self.total_bytes += size;
        self.files.push(ScanEntry { rel_path, size });
    }
}

fn child_rel(rel_dir: &str, name: &str) -> String {
    if rel_dir.is_empty() {
        name.to_string()
    } else {
        format!("{rel_dir}/{name}")
    }
}

/// Walk a local directory tree.
pub async fn walk_local_dir(root: &Path) -> Result<Manifest> {
    let mut manifest = Manifest::default();
    let mut queue: VecDeque<String> = VecDeque::from([String::new()]);

    while let Some(rel_dir) = queue.pop_front() {
        let dir = root.join(&rel_dir);
        let mut read_dir = tokio::fs::read_dir(&dir).await.map_err(|e| {
            AppError::IOError(std::io::Error::new(
                e.kind(),
                format!("read local directory '{}': {e}", dir.display()),
            ))
        })?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Do not follow symlinks.
            let metadata = tokio::fs::symlink_metadata(entry.path()).await?;
            entries.push((name, metadata));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, metadata) in entries {
            let rel = child_rel(&rel_dir, &name);
            if metadata.is_dir() {
                queue.push_back(rel);
            } else if metadata.is_file() {
                manifest.push(rel, metadata.len());
            } else {
                debug!("skipping non-regular local entry {}", rel);
            }
        }
    }

    Ok(manifest)
}

/// Walk a remote directory tree.
pub async fn walk_remote_dir<F: RemoteFs>(fs: &F, root: &str) -> Result<Manifest> {
    let root = if root.len() > 1 {
        root.trim_end_matches('/')
    } else {
        root
    };
    let mut manifest = Manifest::default();
    let mut queue: VecDeque<String> = VecDeque::from([String::new()]);

    while let Some(rel_dir) = queue.pop_front() {
        let dir = if rel_dir.is_empty() {
            root.to_string()
        } else {
            join_remote(root, &rel_dir)
        };
        let mut entries = fs.read_dir(&dir).await?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        for entry in entries {
            let rel = child_rel(&rel_dir, entry.name.trim_end_matches('/'));
            match entry.kind {
                EntryKind::Dir => queue.push_back(rel),
                EntryKind::File => manifest.push(rel, entry.size),
                EntryKind::Symlink | EntryKind::Other => {
                    debug!("skipping non-regular remote entry {}", rel);
                }
            }
        }
    }

    Ok(manifest)
}
