//! Line-oriented file transfer shell.
//!
//! Runs in cooked mode. `get` and `put` run on their own task so an interrupt
//! can cancel them; the prompt only comes back once the task has finished
//! unwinding.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::paths::PathState;
use super::progress::{ConsoleProgress, ProgressReporter};
use super::remote_fs::{EntryKind, RemoteFs, create_dir_all};
use super::transfer::{BatchReport, TransferEngine, TransferSummary};
use crate::error::{AppError, Result};
use crate::utils::{base_name, format_bytes, format_mtime, mode_string};

const GREEN_BOLD: &str = "\x1b[1;32m";
const GREEN: &str = "\x1b[32m";
const GRAY: &str = "\x1b[90m";
const RESET: &str = "\x1b[0m";

const CMD_WIDTH: usize = 10;
const ARGS_WIDTH: usize = 20;
const DESC_WIDTH: usize = 35;

const COMMANDS: &[(&str, &str, &str)] = &[
    ("cd", "<path>", "Change remote directory"),
    ("lcd", "<path>", "Change local directory"),
    ("pwd", "", "Print remote working directory"),
    ("lpwd", "", "Print local working directory"),
    ("ls", "[path]", "List remote files"),
    ("lls", "[path]", "List local files"),
    ("get", "<remote> [local]", "Download file or directory"),
    ("put", "<local> [remote]", "Upload file or directory"),
    ("mkdir", "<path>", "Create remote directory"),
    ("lmkdir", "<path>", "Create local directory"),
    ("help", "", "Show this help"),
    ("exit", "", "Exit SFTP shell"),
    ("quit", "", "Exit SFTP shell (alias)"),
    ("bye", "", "Exit SFTP shell (alias)"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Download,
    Upload,
}

impl Direction {
    fn noun(self) -> &'static str {
        match self {
            Direction::Download => "Download",
            Direction::Upload => "Upload",
        }
    }

    fn past(self) -> &'static str {
        match self {
            Direction::Download => "downloaded",
            Direction::Upload => "uploaded",
        }
    }
}

pub struct SftpShell<F: RemoteFs> {
    fs: Arc<F>,
    paths: PathState,
    user: String,
    host: String,
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
    progress: Arc<dyn ProgressReporter>,
}

impl<F: RemoteFs> SftpShell<F> {
    pub fn new(fs: Arc<F>, paths: PathState, user: &str, host: &str) -> Self {
        Self {
            fs,
            paths,
            user: user.to_string(),
            host: host.to_string(),
            out: Box::new(std::io::stdout()),
            err: Box::new(std::io::stderr()),
            progress: Arc::new(ConsoleProgress::new()),
        }
    }

    pub fn with_output(mut self, out: Box<dyn Write + Send>, err: Box<dyn Write + Send>) -> Self {
        self.out = out;
        self.err = err;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn paths(&self) -> &PathState {
        &self.paths
    }

    /// Read commands from `lines` until `exit` or end of input. Each message
    /// on `interrupts` is one Ctrl-C.
    pub async fn run(
        &mut self,
        mut lines: mpsc::Receiver<String>,
        mut interrupts: mpsc::Receiver<()>,
    ) -> Result<()> {
        writeln!(self.out, "SFTP shell started. Type 'help' for commands.")?;
        writeln!(self.out, "Press Ctrl+C to interrupt file transfers.")?;

        loop {
            self.prompt()?;
            tokio::select! {
                line = lines.recv() => {
                    let Some(line) = line else {
                        writeln!(self.out)?;
                        debug!("sftp shell input closed");
                        return Ok(());
                    };
                    let parts: Vec<&str> = line.split_whitespace().collect();
                    let Some((cmd, args)) = parts.split_first() else {
                        continue;
                    };
                    let cmd = cmd.to_lowercase();

                    if cmd == "get" || cmd == "put" {
                        self.run_transfer(&cmd, args, &mut interrupts).await?;
                        continue;
                    }
                    match self.execute(&cmd, args).await {
                        Ok(Flow::Exit) => return Ok(()),
                        Ok(Flow::Continue) => {}
                        Err(e) => writeln!(self.err, "Error: {e}")?,
                    }
                }
                Some(()) = interrupts.recv() => {
                    writeln!(self.out)?;
                }
            }
        }
    }

    fn prompt(&mut self) -> Result<()> {
        write!(
            self.out,
            "{GREEN_BOLD}sftp {}@{}:{}>{RESET} ",
            self.user,
            self.host,
            self.paths.remote_cwd()
        )?;
        self.out.flush()?;
        Ok(())
    }

    /// Run every command except `get` and `put`.
    pub async fn execute(&mut self, cmd: &str, args: &[&str]) -> Result<Flow> {
        match cmd {
            "cd" => self.cd(args.first().copied().unwrap_or("~")).await?,
            "lcd" => self.lcd(args.first().copied().unwrap_or("~")).await?,
            "pwd" => writeln!(
                self.out,
                "Remote working directory: {}",
                self.paths.remote_cwd()
            )?,
            "lpwd" => writeln!(
                self.out,
                "Local working directory: {}",
                self.paths.local_cwd().display()
            )?,
            "ls" => self.ls(args.first().copied().unwrap_or(".")).await?,
            "lls" => self.lls(args.first().copied().unwrap_or(".")).await?,
            "mkdir" => {
                let path = args
                    .first()
                    .ok_or_else(|| AppError::Usage("mkdir <path>".to_string()))?;
                let resolved = self.paths.resolve_remote(path)?;
                create_dir_all(&*self.fs, &resolved).await?;
                writeln!(self.out, "Created remote directory: {resolved}")?;
            }
            "lmkdir" => {
                let path = args
                    .first()
                    .ok_or_else(|| AppError::Usage("lmkdir <path>".to_string()))?;
                let resolved = self.paths.resolve_local(path)?;
                tokio::fs::create_dir_all(&resolved).await?;
                writeln!(self.out, "Created local directory: {}", resolved.display())?;
            }
            "help" | "?" => self.help()?,
            "exit" | "quit" | "bye" => return Ok(Flow::Exit),
            other => return Err(AppError::UnknownCommand(other.to_string())),
        }
        Ok(Flow::Continue)
    }

    async fn cd(&mut self, path: &str) -> Result<()> {
        let resolved = self.paths.resolve_remote(path)?;
        let stat = self.fs.stat(&resolved).await?;
        if !stat.is_dir() {
            return Err(AppError::NotADirectory(resolved));
        }
        self.paths.update_remote_cwd(&*self.fs, &resolved).await
    }

    async fn lcd(&mut self, path: &str) -> Result<()> {
        let resolved = self.paths.resolve_local(path)?;
        let metadata = tokio::fs::metadata(&resolved).await?;
        if !metadata.is_dir() {
            return Err(AppError::NotADirectory(resolved.display().to_string()));
        }
        self.paths.update_local_cwd(&resolved)
    }

    async fn ls(&mut self, path: &str) -> Result<()> {
        let resolved = self.paths.resolve_remote(path)?;
        let mut entries = self.fs.read_dir(&resolved).await?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        for entry in entries {
            let is_dir = entry.kind == EntryKind::Dir;
            let mode = mode_string(is_dir, entry.kind == EntryKind::Symlink, entry.permissions);
            let suffix = if is_dir { "/" } else { "" };
            writeln!(
                self.out,
                "{mode} {:>8} {} {}{suffix}",
                entry.size,
                format_mtime(entry.mtime),
                entry.name
            )?;
        }
        Ok(())
    }

    async fn lls(&mut self, path: &str) -> Result<()> {
        let resolved = self.paths.resolve_local(path)?;
        let mut dir = tokio::fs::read_dir(&resolved).await?;
        let mut rows = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let metadata = tokio::fs::symlink_metadata(entry.path()).await?;
            rows.push((entry.file_name().to_string_lossy().into_owned(), metadata));
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, metadata) in rows {
            let file_type = metadata.file_type();
            #[cfg(unix)]
            let permissions = std::os::unix::fs::PermissionsExt::mode(&metadata.permissions());
            #[cfg(not(unix))]
            let permissions = if metadata.is_dir() { 0o755 } else { 0o644 };
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs());
            let mode = mode_string(file_type.is_dir(), file_type.is_symlink(), permissions);
            let suffix = if file_type.is_dir() { "/" } else { "" };
            writeln!(
                self.out,
                "{mode} {:>8} {} {name}{suffix}",
                metadata.len(),
                format_mtime(mtime)
            )?;
        }
        Ok(())
    }

    fn help(&mut self) -> Result<()> {
        self.table_line('┌', '┬', '┐')?;
        self.table_row(("COMMAND", "ARGUMENTS", "DESCRIPTION"), (GRAY, GRAY, GRAY))?;
        self.table_line('├', '┼', '┤')?;
        for &row in COMMANDS {
            self.table_row(row, (GREEN, RESET, RESET))?;
        }
        self.table_line('└', '┴', '┘')
    }

    fn table_line(&mut self, left: char, mid: char, right: char) -> Result<()> {
        let bar = |width: usize| "─".repeat(width + 2);
        writeln!(
            self.out,
            "  {left}{}{mid}{}{mid}{}{right}",
            bar(CMD_WIDTH),
            bar(ARGS_WIDTH),
            bar(DESC_WIDTH)
        )?;
        Ok(())
    }

    fn table_row(
        &mut self,
        (cmd, args, desc): (&str, &str, &str),
        (c1, c2, c3): (&str, &str, &str),
    ) -> Result<()> {
        writeln!(
            self.out,
            "  │ {c1}{cmd:<CMD_WIDTH$}{RESET} │ {c2}{args:<ARGS_WIDTH$}{RESET} │ {c3}{desc:<DESC_WIDTH$}{RESET} │"
        )?;
        Ok(())
    }

    /// Run `get` or `put` on its own task. An interrupt cancels it, and the
    /// prompt waits for the task to drain before returning.
    async fn run_transfer(
        &mut self,
        cmd: &str,
        args: &[&str],
        interrupts: &mut mpsc::Receiver<()>,
    ) -> Result<()> {
        let direction = if cmd == "get" {
            Direction::Download
        } else {
            Direction::Upload
        };
        let (source, destination) = match self.transfer_paths(direction, args) {
            Ok(pair) => pair,
            Err(e) => {
                writeln!(self.err, "Error: {e}")?;
                return Ok(());
            }
        };

        let cancel = CancellationToken::new();
        let engine = TransferEngine::new(
            Arc::clone(&self.fs),
            Arc::clone(&self.progress),
            cancel.clone(),
        );
        info!("{} {} -> {}", cmd, source, destination);
        let mut task = tokio::spawn(async move {
            match direction {
                Direction::Download => engine.get(&source, Path::new(&destination)).await,
                Direction::Upload => engine.put(Path::new(&source), &destination).await,
            }
        });

        let joined = tokio::select! {
            joined = &mut task => joined,
            Some(()) = interrupts.recv() => {
                writeln!(self.out, "\n^C")?;
                cancel.cancel();
                (&mut task).await
            }
        };

        match joined {
            Ok(Ok(summary)) => self.report(direction, &summary)?,
            Ok(Err(e)) if e.is_cancelled() => writeln!(self.err, "Transfer cancelled.")?,
            Ok(Err(AppError::IncompleteBatch(report))) => {
                self.report_batch(direction, &report)?;
                writeln!(
                    self.err,
                    "Error: {} files failed to {}",
                    report.failed.len(),
                    direction.noun().to_lowercase()
                )?;
            }
            Ok(Err(e)) => writeln!(self.err, "Error: {e}")?,
            Err(e) => {
                warn!("transfer task failed: {}", e);
                writeln!(self.err, "Error: transfer task failed: {e}")?;
            }
        }
        Ok(())
    }

    /// Resolve source and destination. A missing destination is the source's
    /// base name in the other side's working directory.
    fn transfer_paths(&self, direction: Direction, args: &[&str]) -> Result<(String, String)> {
        match direction {
            Direction::Download => {
                let src = args
                    .first()
                    .ok_or_else(|| AppError::Usage("get <remote> [local]".to_string()))?;
                let remote = self.paths.resolve_remote(src)?;
                let local = self
                    .paths
                    .resolve_local(args.get(1).copied().unwrap_or(base_name(src)))?;
                Ok((remote, local.display().to_string()))
            }
            Direction::Upload => {
                let src = args
                    .first()
                    .ok_or_else(|| AppError::Usage("put <local> [remote]".to_string()))?;
                let local = self.paths.resolve_local(src)?;
                let remote = self
                    .paths
                    .resolve_remote(args.get(1).copied().unwrap_or(base_name(src)))?;
                Ok((local.display().to_string(), remote))
            }
        }
    }

    fn report(&mut self, direction: Direction, summary: &TransferSummary) -> Result<()> {
        match summary {
            TransferSummary::File {
                source,
                destination,
                bytes,
            } => {
                let shown = match direction {
                    Direction::Download => source,
                    Direction::Upload => destination,
                };
                writeln!(
                    self.out,
                    "{} complete: {shown} ({})",
                    direction.noun(),
                    format_bytes(*bytes)
                )?;
            }
            TransferSummary::Directory(report) => self.report_batch(direction, report)?,
        }
        Ok(())
    }

    fn report_batch(&mut self, direction: Direction, report: &BatchReport) -> Result<()> {
        if report.total_files == 0 {
            let shown = match direction {
                Direction::Download => &report.source,
                Direction::Upload => &report.destination,
            };
            writeln!(self.out, "{}ed empty directory: {shown}", direction.noun())?;
            return Ok(());
        }

        for failed in &report.failed {
            writeln!(
                self.out,
                "Warning: failed to {} {}: {}",
                direction.noun().to_lowercase(),
                failed.rel_path,
                failed.reason
            )?;
        }
        if !report.failed.is_empty() {
            writeln!(
                self.out,
                "\n{} completed with {} failures:",
                direction.noun(),
                report.failed.len()
            )?;
            for failed in &report.failed {
                writeln!(self.out, "  - {}", failed.rel_path)?;
            }
        }
        writeln!(
            self.out,
            "{} complete: {}/{} files, {}/{} {}",
            direction.noun(),
            report.transferred,
            report.total_files,
            format_bytes(report.bytes),
            format_bytes(report.total_bytes),
            direction.past()
        )?;
        Ok(())
    }
}

/// Read lines from the process's stdin on a dedicated thread. The channel
/// closes at end of input.
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || forward_lines(std::io::stdin().lock(), tx));
    rx
}

/// Send each line of `reader` without its terminator. Bytes that are not
/// UTF-8 are replaced rather than ending input.
fn forward_lines<R: BufRead>(mut reader: R, tx: mpsc::Sender<String>) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("stdin read failed: {}", e);
                break;
            }
        }
    }
}

/// One message per Ctrl-C. Installing the handler keeps Ctrl-C from ending
/// the process while the shell runs.
pub fn interrupt_events() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).await.is_err() {
                break;
            }
        }
    });
    rx
}
