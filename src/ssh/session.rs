//! Interactive remote shell on one transport.
//!
//! A single driver task owns the russh channel. Everything else talks to it
//! through a [`SessionControl`] handle and learns about completion through a
//! one-shot [`SessionExit`].

use std::sync::atomic::{AtomicU64, Ordering};

use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::chain::Transport;
use super::hop::RusshTransport;
use crate::error::{AppError, Result};
use crate::terminal::ResizeSink;

pub const TERM_TYPE: &str = "xterm-256color";

const COMMAND_BUFFER: usize = 64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Data(Vec<u8>),
    Eof,
    Resize { cols: u16, rows: u16 },
    Close,
}

/// How the remote side finished. A non-zero exit status is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionExit {
    pub exit_status: Option<u32>,
}

/// Cheap, cloneable handle for sending input and control to a session.
#[derive(Debug, Clone)]
pub struct SessionControl {
    id: u64,
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionControl {
    pub fn new(tx: mpsc::Sender<SessionCommand>) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    async fn send(&self, cmd: SessionCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| AppError::SshConnectionError(format!("session {} closed", self.id)))
    }

    pub async fn send_data(&self, data: Vec<u8>) -> Result<()> {
        self.send(SessionCommand::Data(data)).await
    }

    /// Close the session's input stream.
    pub async fn eof(&self) -> Result<()> {
        self.send(SessionCommand::Eof).await
    }

    /// Tear the session down regardless of what the remote is doing.
    pub async fn close(&self) -> Result<()> {
        self.send(SessionCommand::Close).await
    }
}

impl ResizeSink for SessionControl {
    fn id(&self) -> u64 {
        self.id
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.send(SessionCommand::Resize { cols, rows }).await
    }
}

pub type ExitReceiver = oneshot::Receiver<Result<SessionExit>>;

/// A started remote shell: its control handle plus its completion signal.
pub struct RemoteShell {
    control: SessionControl,
    exit: ExitReceiver,
}

impl RemoteShell {
    /// Open a session on `transport`, request a PTY of `size` (cols, rows) and
    /// start the login shell. Output is copied to the local stdout/stderr.
    pub async fn open(transport: &RusshTransport, size: (u16, u16)) -> Result<Self> {
        let channel = transport.handle().channel_open_session().await?;
        debug!("session created on {}", transport.name());

        let (cols, rows) = size;
        channel
            .request_pty(true, TERM_TYPE, u32::from(cols), u32::from(rows), 0, 0, &[])
            .await?;
        debug!("pty requested {}x{}", cols, rows);

        channel.request_shell(true).await?;
        debug!("shell started");

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (exit_tx, exit_rx) = oneshot::channel();
        let control = SessionControl::new(tx);
        info!("session {} running", control.id);
        tokio::spawn(drive(channel, rx, exit_tx));

        Ok(Self::from_parts(control, exit_rx))
    }

    pub fn from_parts(control: SessionControl, exit: ExitReceiver) -> Self {
        Self { control, exit }
    }

    pub fn into_parts(self) -> (SessionControl, ExitReceiver) {
        (self.control, self.exit)
    }
}

async fn drive(
    mut channel: Channel<Msg>,
    mut commands: mpsc::Receiver<SessionCommand>,
    done: oneshot::Sender<Result<SessionExit>>,
) {
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let mut exit = SessionExit::default();
    let mut commands_open = true;

    let result: Result<()> = loop {
        tokio::select! {
            cmd = commands.recv(), if commands_open => match cmd {
                Some(SessionCommand::Data(bytes)) => {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        break Err(e.into());
                    }
                }
                Some(SessionCommand::Eof) => {
                    debug!("sending eof");
                    if let Err(e) = channel.eof().await {
                        debug!("eof failed: {}", e);
                    }
                }
                Some(SessionCommand::Resize { cols, rows }) => {
                    if let Err(e) = channel
                        .window_change(u32::from(cols), u32::from(rows), 0, 0)
                        .await
                    {
                        debug!("window change failed: {}", e);
                    }
                }
                Some(SessionCommand::Close) => {
                    debug!("terminating session");
                    if let Err(e) = channel.close().await {
                        warn!("close failed: {}", e);
                    }
                    break Ok(());
                }
                None => commands_open = false,
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if let Err(e) = write_out(&mut stdout, &data).await {
                        break Err(e);
                    }
                }
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    if let Err(e) = write_out(&mut stderr, &data).await {
                        break Err(e);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!("remote exit status {}", exit_status);
                    exit.exit_status = Some(exit_status);
                }
                Some(ChannelMsg::Close) | None => break Ok(()),
                Some(_) => {}
            },
        }
    };

    let _ = done.send(result.map(|()| exit));
}

async fn write_out<W: AsyncWrite + Unpin>(out: &mut W, data: &[u8]) -> Result<()> {
    out.write_all(data).await?;
    out.flush().await?;
    Ok(())
}
