//! Wires local input to one remote shell and resolves which side ends first.
//!
//! The input forwarder and the completion watcher are started before the
//! terminal goes raw, so a remote that exits immediately can never race the
//! mode switch. Whatever happens, the terminal is restored before `run` returns.

use std::io::Read;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::{RemoteShell, SessionControl, SessionExit};
use crate::error::{AppError, Result};
use crate::terminal::{TerminalDiscipline, TerminalModeManager};

const STDIN_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorTimeouts {
    /// How long the input forwarder gets to notice the session ended.
    pub input_drain: Duration,
    /// How long a session gets to finish on its own after local input ends.
    pub remote_grace: Duration,
}

impl Default for CoordinatorTimeouts {
    fn default() -> Self {
        Self {
            input_drain: Duration::from_millis(100),
            remote_grace: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTrigger {
    /// The remote session completed first.
    RemoteExited,
    /// Local input ended and the session finished within the grace period.
    InputClosed,
    /// Local input ended and the session had to be torn down.
    ForceClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub exit_status: Option<u32>,
    pub trigger: SessionTrigger,
}

pub struct SessionCoordinator<D: TerminalDiscipline> {
    terminal: TerminalModeManager<D, SessionControl>,
    timeouts: CoordinatorTimeouts,
}

impl<D: TerminalDiscipline> SessionCoordinator<D> {
    pub fn new(terminal: TerminalModeManager<D, SessionControl>) -> Self {
        Self {
            terminal,
            timeouts: CoordinatorTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: CoordinatorTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn terminal(&self) -> &TerminalModeManager<D, SessionControl> {
        &self.terminal
    }

    /// Drive `shell` until it ends, feeding it chunks from `input`.
    ///
    /// Only I/O and protocol failures are errors; the remote exit status is
    /// reported in the outcome.
    pub async fn run(
        &self,
        shell: RemoteShell,
        input: mpsc::Receiver<Vec<u8>>,
    ) -> Result<SessionOutcome> {
        let (control, exit_rx) = shell.into_parts();

        let stop_input = CancellationToken::new();
        let mut forwarder = tokio::spawn(forward_input(input, control.clone(), stop_input.clone()));
        let mut watcher: JoinHandle<Result<SessionExit>> = tokio::spawn(async move {
            exit_rx.await.unwrap_or_else(|_| {
                Err(AppError::SshConnectionError(
                    "session driver stopped without reporting".to_string(),
                ))
            })
        });

        if let Err(e) = self.terminal.enter_raw(control.clone()) {
            warn!("could not enter raw mode: {}", e);
            stop_input.cancel();
            let _ = control.close().await;
            let _ = watcher.await;
            forwarder.abort();
            return Err(e);
        }
        // Armed only after raw mode is ours; a failed enter leaves any other
        // bound session alone.
        let _restore = self.terminal.restore_on_drop();

        let (exit, trigger) = tokio::select! {
            biased;
            joined = &mut watcher => {
                debug!("session completed first");
                // Restoring first unblocks a local read stuck in raw mode.
                self.terminal.restore_or_warn();
                stop_input.cancel();
                if timeout(self.timeouts.input_drain, &mut forwarder).await.is_err() {
                    debug!("input forwarder still busy, abandoning it");
                    forwarder.abort();
                }
                (flatten(joined), SessionTrigger::RemoteExited)
            }
            _ = &mut forwarder => {
                debug!("local input ended first");
                match timeout(self.timeouts.remote_grace, &mut watcher).await {
                    Ok(joined) => (flatten(joined), SessionTrigger::InputClosed),
                    Err(_) => {
                        info!("session still running after input closed, forcing close");
                        if let Err(e) = control.close().await {
                            debug!("force close: {}", e);
                        }
                        (flatten((&mut watcher).await), SessionTrigger::ForceClosed)
                    }
                }
            }
        };

        self.terminal.restore_or_warn();

        let exit = exit?;
        info!(
            "session ended ({:?}), exit status {:?}",
            trigger, exit.exit_status
        );
        Ok(SessionOutcome {
            exit_status: exit.exit_status,
            trigger,
        })
    }
}

fn flatten(
    joined: std::result::Result<Result<SessionExit>, tokio::task::JoinError>,
) -> Result<SessionExit> {
    joined.map_err(|e| AppError::SshConnectionError(format!("session watcher failed: {e}")))?
}

/// Copy local input into the session until input is exhausted, then close
/// the session's input. Stops early when `stop` is cancelled.
async fn forward_input(
    mut input: mpsc::Receiver<Vec<u8>>,
    control: SessionControl,
    stop: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            chunk = input.recv() => match chunk {
                Some(bytes) => control.send_data(bytes).await?,
                None => {
                    debug!("local input exhausted");
                    let _ = control.eof().await;
                    return Ok(());
                }
            },
        }
    }
}

/// Read raw bytes from the process's stdin on a dedicated thread.
///
/// The thread is detached: a read blocked on the terminal never holds up
/// runtime shutdown. The channel closes at end of input.
pub fn stdin_bytes() -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(32);
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; STDIN_CHUNK];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
    rx
}
