//! Working directories for both ends of an SFTP shell.
//!
//! Remote paths are always `/`-separated regardless of the local platform and
//! are collapsed with their own rules. The remote working directory only ever
//! holds a value produced by the server's canonicalization.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::remote_fs::RemoteFs;
use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct PathState {
    local_cwd: PathBuf,
    remote_cwd: String,
    local_home: PathBuf,
    remote_home: String,
}

impl PathState {
    pub fn new(
        local_cwd: PathBuf,
        local_home: PathBuf,
        remote_cwd: String,
        remote_home: String,
    ) -> Self {
        Self {
            local_cwd,
            remote_cwd,
            local_home,
            remote_home,
        }
    }

    /// Local side starts in the process's working directory, remote side in
    /// the login directory.
    pub async fn init<F: RemoteFs>(fs: &F) -> Result<Self> {
        let local_cwd = std::env::current_dir()?;
        let local_home = dirs::home_dir().unwrap_or_else(|| local_cwd.clone());
        let remote_home = fs.canonicalize(".").await?;
        debug!(
            "paths: local {} (home {}), remote {}",
            local_cwd.display(),
            local_home.display(),
            remote_home
        );
        Ok(Self::new(
            local_cwd,
            local_home,
            remote_home.clone(),
            remote_home,
        ))
    }

    pub fn local_cwd(&self) -> &Path {
        &self.local_cwd
    }

    pub fn remote_cwd(&self) -> &str {
        &self.remote_cwd
    }

    pub fn local_home(&self) -> &Path {
        &self.local_home
    }

    pub fn remote_home(&self) -> &str {
        &self.remote_home
    }

    pub fn resolve_remote(&self, path: &str) -> Result<String> {
        if path.is_empty() || path == "." {
            return Ok(self.remote_cwd.clone());
        }
        if let Some(rest) = path.strip_prefix('~') {
            if rest.is_empty() {
                return Ok(self.remote_home.clone());
            }
            let Some(rest) = rest.strip_prefix('/') else {
                return Err(AppError::UnsupportedPathForm(path.to_string()));
            };
            return Ok(clean_remote(&format!("{}/{}", self.remote_home, rest)));
        }
        if path.starts_with('/') {
            return Ok(clean_remote(path));
        }
        Ok(clean_remote(&format!("{}/{}", self.remote_cwd, path)))
    }

    pub fn resolve_local(&self, path: &str) -> Result<PathBuf> {
        if path.is_empty() || path == "." {
            return Ok(self.local_cwd.clone());
        }
        if let Some(rest) = path.strip_prefix('~') {
            if rest.is_empty() {
                return Ok(self.local_home.clone());
            }
            let Some(rest) = rest
                .strip_prefix('/')
                .or_else(|| rest.strip_prefix(std::path::MAIN_SEPARATOR))
            else {
                return Err(AppError::UnsupportedPathForm(path.to_string()));
            };
            return Ok(clean_local(&self.local_home.join(rest)));
        }
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return Ok(clean_local(candidate));
        }
        Ok(clean_local(&self.local_cwd.join(candidate)))
    }

    /// Store the server's canonical form of `path` as the remote working
    /// directory, never the locally computed string.
    pub async fn update_remote_cwd<F: RemoteFs>(&mut self, fs: &F, path: &str) -> Result<()> {
        let canonical = fs.canonicalize(path).await?;
        debug!("remote cwd {} -> {}", self.remote_cwd, canonical);
        self.remote_cwd = canonical;
        Ok(())
    }

    pub fn update_local_cwd(&mut self, path: &Path) -> Result<()> {
        self.local_cwd = std::path::absolute(path)?;
        Ok(())
    }
}

/// Collapse `.`, `..` and repeated separators in an absolute remote path.
/// `..` never climbs above the root.
pub fn clean_remote(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Join a remote directory and a child name.
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Lexical cleanup of a local path, without touching the filesystem.
pub fn clean_local(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp::testing::{FAKE_HOME, FakeRemoteFs};

    fn state(remote_cwd: &str) -> PathState {
        PathState::new(
            PathBuf::from("/work/project"),
            PathBuf::from("/home/me"),
            remote_cwd.to_string(),
            "/home/u".to_string(),
        )
    }

    #[test]
    fn remote_resolution() {
        let paths = state("/a/b");
        assert_eq!(paths.resolve_remote("..").unwrap(), "/a");
        assert_eq!(paths.resolve_remote("/x/../y").unwrap(), "/y");
        assert_eq!(paths.resolve_remote("~").unwrap(), "/home/u");
        assert_eq!(paths.resolve_remote("~/docs/./a").unwrap(), "/home/u/docs/a");
        assert_eq!(paths.resolve_remote("").unwrap(), "/a/b");
        assert_eq!(paths.resolve_remote(".").unwrap(), "/a/b");
        assert_eq!(paths.resolve_remote("c//d/").unwrap(), "/a/b/c/d");
        assert_eq!(paths.resolve_remote("../../../..").unwrap(), "/");
    }

    #[test]
    fn tilde_user_is_rejected() {
        let paths = state("/a");
        assert!(matches!(
            paths.resolve_remote("~root/x"),
            Err(AppError::UnsupportedPathForm(_))
        ));
        assert!(matches!(
            paths.resolve_local("~root"),
            Err(AppError::UnsupportedPathForm(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn local_resolution() {
        let paths = state("/");
        assert_eq!(paths.resolve_local("").unwrap(), PathBuf::from("/work/project"));
        assert_eq!(paths.resolve_local("..").unwrap(), PathBuf::from("/work"));
        assert_eq!(paths.resolve_local("~").unwrap(), PathBuf::from("/home/me"));
        assert_eq!(
            paths.resolve_local("~/dl/../src").unwrap(),
            PathBuf::from("/home/me/src")
        );
        assert_eq!(paths.resolve_local("/etc/./ssh").unwrap(), PathBuf::from("/etc/ssh"));
        assert_eq!(
            paths.resolve_local("sub/file.txt").unwrap(),
            PathBuf::from("/work/project/sub/file.txt")
        );
    }

    #[test]
    fn join_handles_root() {
        assert_eq!(join_remote("/", "a"), "/a");
        assert_eq!(join_remote("/a", "b"), "/a/b");
    }

    #[tokio::test]
    async fn remote_cwd_stores_canonical_form() {
        let fs = FakeRemoteFs::new();
        fs.mkdir("/real/target");
        fs.add_symlink("/link", "/real/target");

        let mut paths = state("/");
        let requested = paths.resolve_remote("link").unwrap();
        assert_eq!(requested, "/link");

        paths.update_remote_cwd(&fs, &requested).await.unwrap();
        assert_eq!(paths.remote_cwd(), "/real/target");
        assert_eq!(paths.resolve_remote("..").unwrap(), "/real");
    }

    #[tokio::test]
    async fn init_starts_remote_side_in_login_directory() {
        let fs = FakeRemoteFs::new();
        let paths = PathState::init(&fs).await.unwrap();

        assert_eq!(paths.remote_home(), FAKE_HOME);
        assert_eq!(paths.remote_cwd(), FAKE_HOME);
        assert_eq!(paths.local_cwd(), std::env::current_dir().unwrap());
        let expected_home = dirs::home_dir().unwrap_or_else(|| paths.local_cwd().to_path_buf());
        assert_eq!(paths.local_home(), expected_home);
        assert_eq!(paths.resolve_local("~").unwrap(), paths.local_home());
    }
}
