use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use super::host::HostDescriptor;
use crate::error::{AppError, Result};
use crate::utils::expand_tilde;

/// Default inventory files, loaded and merged in this order.
pub fn default_config_paths() -> Result<Vec<PathBuf>> {
    let home = dirs::home_dir()
        .ok_or_else(|| AppError::ConfigError("HOME directory not found".to_string()))?;
    Ok(vec![home.join(".hopshell.yaml"), home.join(".sshw.yaml")])
}

/// Loaded host inventory plus the non-fatal problems hit while loading it.
#[derive(Debug, Default)]
pub struct ConfigManager {
    hosts: Vec<HostDescriptor>,
    warnings: Vec<String>,
}

impl ConfigManager {
    /// Load a single explicit file, or merge the default files when `path` is `None`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => Self::load_file(&expand_tilde(p)),
            None => Self::load_merged(&default_config_paths()?),
        }
    }

    /// Load one file. Any read, parse or validation failure is fatal.
    pub fn load_file(path: &Path) -> Result<Self> {
        let hosts = read_hosts(path)?;
        Ok(Self {
            hosts,
            warnings: Vec::new(),
        })
    }

    /// Merge every file in `paths` that exists. A file that fails to load is
    /// recorded as a warning and skipped; loading nothing is an error.
    pub fn load_merged(paths: &[PathBuf]) -> Result<Self> {
        let mut hosts = Vec::new();
        let mut warnings = Vec::new();
        let mut loaded = 0usize;

        for path in paths {
            if !path.exists() {
                debug!("config file {} not present", path.display());
                continue;
            }
            match read_hosts(path) {
                Ok(mut file_hosts) => {
                    debug!("loaded {} hosts from {}", file_hosts.len(), path.display());
                    hosts.append(&mut file_hosts);
                    loaded += 1;
                }
                Err(e) => {
                    warn!("failed to load {}: {}", path.display(), e);
                    warnings.push(format!("failed to load {}: {}", path.display(), e));
                }
            }
        }

        if loaded == 0 {
            return Err(AppError::NoConfigFound(paths.to_vec()));
        }

        Ok(Self { hosts, warnings })
    }

    pub fn from_yaml_str(path: &Path, content: &str) -> Result<Self> {
        Ok(Self {
            hosts: parse_hosts(path, content)?,
            warnings: Vec::new(),
        })
    }

    pub fn hosts(&self) -> &[HostDescriptor] {
        &self.hosts
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Entries listed under the group addressed by `path`; the top level when
    /// `path` is empty. An unknown path yields an empty slice.
    pub fn hosts_at_path<S: AsRef<str>>(&self, path: &[S]) -> &[HostDescriptor] {
        if path.is_empty() {
            return &self.hosts;
        }
        find_by_segments(&self.hosts, path)
            .map(|h| h.children.as_slice())
            .unwrap_or(&[])
    }

    /// Depth-first lookup by `/`-separated names, e.g. `k3s/node-1`.
    pub fn find(&self, name: &str) -> Option<&HostDescriptor> {
        let segments: Vec<&str> = name.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return None;
        }
        find_by_segments(&self.hosts, &segments)
    }
}

fn find_by_segments<'a, S: AsRef<str>>(
    hosts: &'a [HostDescriptor],
    path: &[S],
) -> Option<&'a HostDescriptor> {
    let (first, rest) = path.split_first()?;
    let host = hosts.iter().find(|h| h.name == first.as_ref())?;
    if rest.is_empty() {
        Some(host)
    } else {
        find_by_segments(&host.children, rest)
    }
}

fn read_hosts(path: &Path) -> Result<Vec<HostDescriptor>> {
    let content = fs::read_to_string(path).map_err(|e| AppError::ParseError {
        path: path.to_path_buf(),
        message: format!("read: {e}"),
    })?;
    parse_hosts(path, &content)
}

fn parse_hosts(path: &Path, content: &str) -> Result<Vec<HostDescriptor>> {
    let mut hosts: Vec<HostDescriptor> =
        serde_yaml::from_str(content).map_err(|e| AppError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    for (index, host) in hosts.iter_mut().enumerate() {
        host.validate()
            .map_err(|message| AppError::ValidationError {
                index,
                name: host.name.clone(),
                message,
            })?;
    }

    Ok(hosts)
}
