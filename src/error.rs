use std::path::PathBuf;

use thiserror::Error;

use crate::sftp::transfer::BatchReport;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("no config file found, tried: {}", format_paths(.0))]
    NoConfigFound(Vec<PathBuf>),

    #[error("parse config {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("validate host #{index} ({name}): {message}")]
    ValidationError {
        index: usize,
        name: String,
        message: String,
    },

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("SSH connection failed: {0}")]
    SshConnectionError(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// `index` is zero-based; the message prints it one-based.
    #[error("hop {} ({name}): {source}", .index + 1)]
    HopFailed {
        index: usize,
        name: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("close chain: {}", .0.join("; "))]
    ChainClose(Vec<String>),

    #[error("not connected")]
    NotConnected,

    #[error("terminal is already in raw mode")]
    AlreadyRaw,

    #[error("Terminal error: {0}")]
    TerminalError(String),

    #[error("usage: {0}")]
    Usage(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("unsupported path form: {0}")]
    UnsupportedPathForm(String),

    #[error("SFTP error: {0}")]
    SftpError(String),

    #[error("size mismatch: wrote {written} bytes, expected {expected}")]
    SizeMismatch { written: u64, expected: u64 },

    #[error("{0} is not a directory")]
    NotADirectory(String),

    #[error("{} files failed", .0.failed.len())]
    IncompleteBatch(BatchReport),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Russh error: {0}")]
    RusshError(#[from] russh::Error),

    #[error("Key error: {0}")]
    KeyError(#[from] russh::keys::Error),

    #[error("Russh Sftp error: {0}")]
    RusshSftpError(#[from] russh_sftp::client::error::Error),
}

impl AppError {
    /// Cancellation is reported to the user differently from failures.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;
