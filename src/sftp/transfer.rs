//! Single-file and recursive transfers between the local filesystem and a
//! [`RemoteFs`], with batched progress and cooperative cancellation.
//!
//! A destination that was only partially written, because of an error or a
//! cancellation, is removed before the error is returned.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dir_walker::{Manifest, walk_local_dir, walk_remote_dir};
use super::paths::join_remote;
use super::progress::ProgressReporter;
use super::remote_fs::{RemoteFs, create_dir_all};
use crate::error::{AppError, Result};
use crate::utils::base_name;

pub const COPY_BUFFER_SIZE: usize = 1024 * 1024;
/// Progress is reported once this many bytes have accumulated.
pub const PROGRESS_BATCH: u64 = 512 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub rel_path: String,
    pub reason: String,
}

/// Outcome of a directory transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub source: String,
    pub destination: String,
    pub total_files: usize,
    pub total_bytes: u64,
    pub transferred: usize,
    pub bytes: u64,
    pub failed: Vec<FailedFile>,
}

impl BatchReport {
    fn new(source: String, destination: String, manifest: &Manifest) -> Self {
        Self {
            source,
            destination,
            total_files: manifest.files.len(),
            total_bytes: manifest.total_bytes,
            ..Default::default()
        }
    }

    fn finish(self) -> Result<Self> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(AppError::IncompleteBatch(self))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSummary {
    File {
        source: String,
        destination: String,
        bytes: u64,
    },
    Directory(BatchReport),
}

fn local_err(op: &str, path: &Path, e: std::io::Error) -> AppError {
    AppError::IOError(std::io::Error::new(
        e.kind(),
        format!("{op} {}: {e}", path.display()),
    ))
}

/// Join a `/`-separated relative path onto a local directory.
fn join_local(root: &Path, rel: &str) -> PathBuf {
    rel.split('/')
        .filter(|p| !p.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

fn parent_remote(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => ".",
    }
}

/// One transfer command's worth of work. The token is checked between files,
/// before each file starts, and at every buffer boundary while copying.
pub struct TransferEngine<F: RemoteFs> {
    fs: Arc<F>,
    progress: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
}

impl<F: RemoteFs> TransferEngine<F> {
    pub fn new(
        fs: Arc<F>,
        progress: Arc<dyn ProgressReporter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fs,
            progress,
            cancel,
        }
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(AppError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Download `remote`, recursively if it is a directory.
    pub async fn get(&self, remote: &str, local: &Path) -> Result<TransferSummary> {
        let stat = self.fs.stat(remote).await?;
        if stat.is_dir() {
            return self
                .download_dir(remote, local)
                .await
                .map(TransferSummary::Directory);
        }
        let (destination, bytes) = self.download_file(remote, local).await?;
        Ok(TransferSummary::File {
            source: remote.to_string(),
            destination: destination.display().to_string(),
            bytes,
        })
    }

    /// Upload `local`, recursively if it is a directory.
    pub async fn put(&self, local: &Path, remote: &str) -> Result<TransferSummary> {
        let metadata = tokio::fs::metadata(local)
            .await
            .map_err(|e| local_err("stat", local, e))?;
        if metadata.is_dir() {
            return self
                .upload_dir(local, remote)
                .await
                .map(TransferSummary::Directory);
        }
        let (destination, bytes) = self.upload_file(local, remote).await?;
        Ok(TransferSummary::File {
            source: local.display().to_string(),
            destination,
            bytes,
        })
    }

    /// Returns the path actually written and its size. An existing directory
    /// destination receives the file under the source's base name.
    pub async fn download_file(&self, remote: &str, local: &Path) -> Result<(PathBuf, u64)> {
        let destination = if tokio::fs::metadata(local)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            local.join(base_name(remote))
        } else {
            local.to_path_buf()
        };
        let bytes = self.download_one(remote, &destination, 1, 1).await?;
        Ok((destination, bytes))
    }

    pub async fn upload_file(&self, local: &Path, remote: &str) -> Result<(String, u64)> {
        let destination = match self.fs.stat(remote).await {
            Ok(stat) if stat.is_dir() => {
                join_remote(remote, base_name(&local.to_string_lossy()))
            }
            _ => remote.to_string(),
        };
        let bytes = self.upload_one(local, &destination, 1, 1).await?;
        Ok((destination, bytes))
    }

    async fn download_one(
        &self,
        remote: &str,
        local: &Path,
        index: usize,
        count: usize,
    ) -> Result<u64> {
        self.check_cancel()?;
        let expected = self.fs.stat(remote).await?.size;
        let mut reader = self.fs.open(remote).await?;
        let mut file = tokio::fs::File::create(local)
            .await
            .map_err(|e| local_err("create local", local, e))?;

        self.progress
            .start_file(index, count, base_name(remote), expected);
        let result: Result<u64> = async {
            let written = self.copy(&mut reader, &mut file, expected).await?;
            file.flush()
                .await
                .map_err(|e| local_err("flush", local, e))?;
            file.sync_all()
                .await
                .map_err(|e| local_err("sync", local, e))?;
            Ok(written)
        }
        .await;
        self.progress.finish_file();
        drop(file);

        if let Err(e) = &result {
            debug!("download of {} failed ({}), removing {}", remote, e, local.display());
            if let Err(rm) = tokio::fs::remove_file(local).await {
                warn!("could not remove partial file {}: {}", local.display(), rm);
            }
        }
        result
    }

    async fn upload_one(
        &self,
        local: &Path,
        remote: &str,
        index: usize,
        count: usize,
    ) -> Result<u64> {
        self.check_cancel()?;
        let mut file = tokio::fs::File::open(local)
            .await
            .map_err(|e| local_err("open local", local, e))?;
        let expected = file
            .metadata()
            .await
            .map_err(|e| local_err("stat", local, e))?
            .len();
        let mut writer = self.fs.create(remote).await?;

        self.progress
            .start_file(index, count, base_name(&local.to_string_lossy()), expected);
        let result: Result<u64> = async {
            let written = self.copy(&mut file, &mut writer, expected).await?;
            writer.flush().await?;
            writer.shutdown().await?;
            Ok(written)
        }
        .await;
        self.progress.finish_file();
        drop(writer);

        if let Err(e) = &result {
            debug!("upload of {} failed ({}), removing {}", local.display(), e, remote);
            if let Err(rm) = self.fs.remove_file(remote).await {
                warn!("could not remove partial remote file {}: {}", remote, rm);
            }
        }
        result
    }

    /// Copy everything from `reader` to `writer` and check the total against
    /// `expected`.
    async fn copy<R, W>(&self, reader: &mut R, writer: &mut W, expected: u64) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut written = 0u64;
        let mut unreported = 0u64;

        loop {
            self.check_cancel()?;
            let n = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(AppError::Cancelled),
                n = reader.read(&mut buf) => n?,
            };
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;
            written += n as u64;
            unreported += n as u64;
            if unreported >= PROGRESS_BATCH {
                self.progress.advance(unreported);
                unreported = 0;
            }
        }
        if unreported > 0 {
            self.progress.advance(unreported);
        }

        if written != expected {
            return Err(AppError::SizeMismatch { written, expected });
        }
        Ok(written)
    }

    pub async fn download_dir(&self, remote: &str, local: &Path) -> Result<BatchReport> {
        let manifest = walk_remote_dir(&*self.fs, remote).await?;

        match tokio::fs::metadata(local).await {
            Ok(m) if !m.is_dir() => {
                return Err(AppError::NotADirectory(local.display().to_string()));
            }
            Ok(_) => {}
            Err(_) => tokio::fs::create_dir_all(local)
                .await
                .map_err(|e| local_err("create local directory", local, e))?,
        }

        info!(
            "downloading {} ({} files, {} bytes) to {}",
            remote,
            manifest.files.len(),
            manifest.total_bytes,
            local.display()
        );
        let mut report = BatchReport::new(
            remote.to_string(),
            local.display().to_string(),
            &manifest,
        );
        let count = manifest.files.len();

        for (i, entry) in manifest.files.iter().enumerate() {
            self.check_cancel()?;
            let src = join_remote(remote.trim_end_matches('/'), &entry.rel_path);
            let dst = join_local(local, &entry.rel_path);

            let outcome: Result<u64> = async {
                if let Some(parent) = dst.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| local_err("create local directory", parent, e))?;
                }
                self.download_one(&src, &dst, i + 1, count).await
            }
            .await;

            match outcome {
                Ok(bytes) => {
                    report.transferred += 1;
                    report.bytes += bytes;
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!("download of {} failed: {}", entry.rel_path, e);
                    report.failed.push(FailedFile {
                        rel_path: entry.rel_path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.finish()
    }

    pub async fn upload_dir(&self, local: &Path, remote: &str) -> Result<BatchReport> {
        let manifest = walk_local_dir(local).await?;

        match self.fs.stat(remote).await {
            Ok(stat) if !stat.is_dir() => {
                return Err(AppError::NotADirectory(remote.to_string()));
            }
            Ok(_) => {}
            Err(_) => create_dir_all(&*self.fs, remote).await?,
        }

        info!(
            "uploading {} ({} files, {} bytes) to {}",
            local.display(),
            manifest.files.len(),
            manifest.total_bytes,
            remote
        );
        let mut report = BatchReport::new(
            local.display().to_string(),
            remote.to_string(),
            &manifest,
        );
        let count = manifest.files.len();

        for (i, entry) in manifest.files.iter().enumerate() {
            self.check_cancel()?;
            let src = join_local(local, &entry.rel_path);
            let dst = join_remote(remote.trim_end_matches('/'), &entry.rel_path);

            let outcome: Result<u64> = async {
                create_dir_all(&*self.fs, parent_remote(&dst)).await?;
                self.upload_one(&src, &dst, i + 1, count).await
            }
            .await;

            match outcome {
                Ok(bytes) => {
                    report.transferred += 1;
                    report.bytes += bytes;
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!("upload of {} failed: {}", entry.rel_path, e);
                    report.failed.push(FailedFile {
                        rel_path: entry.rel_path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.finish()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::sftp::progress::NullProgress;
    use crate::sftp::testing::FakeRemoteFs;

    fn engine(fs: &Arc<FakeRemoteFs>) -> (TransferEngine<FakeRemoteFs>, CancellationToken) {
        let cancel = CancellationToken::new();
        (
            TransferEngine::new(Arc::clone(fs), Arc::new(NullProgress), cancel.clone()),
            cancel,
        )
    }

    #[tokio::test]
    async fn directory_download_continues_past_failures() {
        let fs = Arc::new(FakeRemoteFs::new());
        for name in ["a.txt", "b.txt", "c.txt", "sub/d.txt", "sub/e.txt"] {
            fs.write(&format!("/data/{name}"), name.as_bytes());
        }
        fs.fail_open("/data/b.txt");
        fs.fail_open("/data/sub/e.txt");

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("out");
        let (engine, _) = engine(&fs);

        let err = engine.download_dir("/data", &dest).await.unwrap_err();
        let AppError::IncompleteBatch(report) = err else {
            panic!("expected an incomplete batch, got {err}");
        };
        assert_eq!(report.total_files, 5);
        assert_eq!(report.transferred, 3);
        let failed: Vec<&str> = report.failed.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(failed, vec!["b.txt", "sub/e.txt"]);

        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"a.txt");
        assert_eq!(fs::read(dest.join("sub/d.txt")).unwrap(), b"sub/d.txt");
        assert!(!dest.join("b.txt").exists());
    }

    #[tokio::test]
    async fn cancelled_download_leaves_no_partial_file() {
        let fs = Arc::new(FakeRemoteFs::new());
        fs.write("/big.bin", &vec![7u8; 256 * 1024]);
        let (engine, cancel) = engine(&fs);
        fs.trip_on_read("/big.bin", cancel);

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("big.bin");
        let err = engine.download_file("/big.bin", &dest).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn cancelled_upload_writes_nothing() {
        let fs = Arc::new(FakeRemoteFs::new());
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("up.bin");
        fs::write(&src, vec![1u8; 64 * 1024]).unwrap();

        let (engine, cancel) = engine(&fs);
        cancel.cancel();
        let err = engine.upload_file(&src, "/up.bin").await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!fs.exists("/up.bin"));
    }

    /// Cancels the transfer the first time any progress is reported.
    struct CancelOnAdvance {
        cancel: CancellationToken,
        advanced: std::sync::atomic::AtomicU64,
    }

    impl ProgressReporter for CancelOnAdvance {
        fn start_file(&self, _index: usize, _count: usize, _name: &str, _total: u64) {}

        fn advance(&self, bytes: u64) {
            self.advanced
                .fetch_add(bytes, std::sync::atomic::Ordering::SeqCst);
            self.cancel.cancel();
        }

        fn finish_file(&self) {}
    }

    #[tokio::test]
    async fn upload_cancelled_mid_copy_removes_remote_file() {
        let fs = Arc::new(FakeRemoteFs::new());
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("big.bin");
        let size = 3 * COPY_BUFFER_SIZE;
        fs::write(&src, vec![9u8; size]).unwrap();

        let cancel = CancellationToken::new();
        let progress = Arc::new(CancelOnAdvance {
            cancel: cancel.clone(),
            advanced: Default::default(),
        });
        let engine = TransferEngine::new(Arc::clone(&fs), progress.clone(), cancel);

        let err = engine.upload_file(&src, "/big.bin").await.unwrap_err();
        assert!(err.is_cancelled());
        let advanced = progress
            .advanced
            .load(std::sync::atomic::Ordering::SeqCst);
        assert!(advanced > 0 && advanced < size as u64);
        assert!(!fs.exists("/big.bin"));
    }

    #[tokio::test]
    async fn file_into_existing_directory_keeps_base_name() {
        let fs = Arc::new(FakeRemoteFs::new());
        fs.write("/srv/report.csv", b"x,y\n1,2\n");
        let tmp = TempDir::new().unwrap();
        let (engine, _) = engine(&fs);

        let summary = engine.get("/srv/report.csv", tmp.path()).await.unwrap();
        match summary {
            TransferSummary::File { bytes, destination, .. } => {
                assert_eq!(bytes, 8);
                assert!(destination.ends_with("report.csv"));
            }
            other => panic!("unexpected summary {other:?}"),
        }
        assert!(tmp.path().join("report.csv").exists());
    }

    #[tokio::test]
    async fn directory_upload_creates_remote_tree() {
        let fs = Arc::new(FakeRemoteFs::new());
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("proj");
        fs::create_dir_all(src.join("src/bin")).unwrap();
        fs::write(src.join("Cargo.toml"), "[package]").unwrap();
        fs::write(src.join("src/bin/main.rs"), "fn main() {}").unwrap();

        let (engine, _) = engine(&fs);
        let report = engine.upload_dir(&src, "/deploy/proj").await.unwrap();
        assert_eq!(report.transferred, 2);
        assert_eq!(report.bytes, 9 + 12);
        assert_eq!(fs.read("/deploy/proj/src/bin/main.rs").unwrap(), b"fn main() {}");
    }

    #[tokio::test]
    async fn directory_into_non_directory_fails() {
        let fs = Arc::new(FakeRemoteFs::new());
        fs.write("/dir/f", b"1");
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, "not a dir").unwrap();

        let (engine, _) = engine(&fs);
        let err = engine.download_dir("/dir", &blocker).await.unwrap_err();
        assert!(matches!(err, AppError::NotADirectory(_)));

        fs.write("/taken", b"file");
        let err = engine.upload_dir(tmp.path(), "/taken").await.unwrap_err();
        assert!(matches!(err, AppError::NotADirectory(_)));
    }

    #[tokio::test]
    async fn empty_remote_directory_creates_local_root() {
        let fs = Arc::new(FakeRemoteFs::new());
        fs.mkdir("/empty");
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("empty");
        let (engine, _) = engine(&fs);

        let report = engine.download_dir("/empty", &dest).await.unwrap();
        assert_eq!(report.total_files, 0);
        assert!(dest.is_dir());
    }

    #[test]
    fn remote_parent() {
        assert_eq!(parent_remote("/a/b/c"), "/a/b");
        assert_eq!(parent_remote("/a"), "/");
    }
}
