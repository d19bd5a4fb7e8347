//! Interactive file-transfer shell over the target transport.

pub mod dir_walker;
pub mod paths;
pub mod progress;
pub mod remote_fs;
pub mod shell;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use paths::PathState;
pub use progress::{ConsoleProgress, NullProgress, ProgressReporter};
pub use remote_fs::{EntryKind, RemoteEntry, RemoteFs, RemoteStat, SftpRemoteFs, open_sftp};
pub use shell::SftpShell;
pub use transfer::{BatchReport, FailedFile, TransferEngine, TransferSummary};
