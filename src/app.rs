//! Top-level flow: inventory, host selection, connection, then one
//! interactive session.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info, warn};

use crate::config::{ConfigManager, HostDescriptor};
use crate::error::{AppError, Result};
use crate::sftp::shell::{interrupt_events, stdin_lines};
use crate::sftp::{PathState, SftpRemoteFs, SftpShell, open_sftp};
use crate::ssh::coordinator::stdin_bytes;
use crate::ssh::{
    RemoteShell, RusshConnector, RusshTransport, SessionControl, SessionCoordinator,
    TransportChain,
};
use crate::terminal::{StdinTerminal, TerminalDiscipline, TerminalModeManager};
use crate::ui::{PickerOutcome, SessionMode, run_picker};
use crate::utils::{reset_cursor_and_attributes, restore_tui};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

type StdinModeManager = TerminalModeManager<StdinTerminal, SessionControl>;

/// What the command line asked for.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub config: Option<String>,
    /// `group/leaf` path that bypasses the picker.
    pub host: Option<String>,
    pub mode: Option<SessionMode>,
}

/// Run the whole program and return the process exit code.
pub async fn run(opts: LaunchOptions) -> i32 {
    let config = match ConfigManager::load(opts.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("config load failed: {}", e);
            eprintln!("Error loading config: {e}");
            eprintln!("Create ~/.hopshell.yaml with your host list to get started.");
            return EXIT_FAILURE;
        }
    };
    for warning in config.warnings() {
        eprintln!("Warning: {warning}");
    }
    if config.is_empty() {
        eprintln!("No hosts configured.");
        return EXIT_FAILURE;
    }

    let terminal: StdinModeManager = TerminalModeManager::new(Arc::new(StdinTerminal));
    let interactive = interactive(&config, &opts, terminal.clone());

    match AssertUnwindSafe(interactive).catch_unwind().await {
        Ok(Ok(())) => EXIT_OK,
        Ok(Err(e)) => {
            error!("session failed: {}", e);
            eprintln!("Error: {e}");
            EXIT_FAILURE
        }
        Err(panic) => {
            terminal.restore_or_warn();
            let _ = restore_tui();
            error!("panic in interactive phase: {}", panic_message(panic.as_ref()));
            eprintln!("hopshell stopped unexpectedly; the terminal has been restored.");
            EXIT_FAILURE
        }
    }
}

async fn interactive(
    config: &ConfigManager,
    opts: &LaunchOptions,
    terminal: StdinModeManager,
) -> Result<()> {
    let picked = select_host(config, opts).await;
    if let Err(e) = reset_cursor_and_attributes() {
        warn!("failed to reset cursor: {}", e);
    }

    let (host, mode) = match picked? {
        PickerOutcome::Quit => {
            info!("quit from host picker");
            return Ok(());
        }
        PickerOutcome::Selected { host, mode } => (host, mode),
    };

    info!("connecting to {} ({}) in {} mode", host.name, host.host_port(), mode);
    let chain = TransportChain::connect(&RusshConnector::new(), &host.chain()).await?;

    let result = match mode {
        SessionMode::Ssh => run_ssh(&chain, terminal).await,
        SessionMode::Sftp => run_sftp(&chain, &host).await,
    };

    if let Err(e) = chain.close().await {
        warn!("closing connection chain: {}", e);
    }
    result
}

async fn select_host(config: &ConfigManager, opts: &LaunchOptions) -> Result<PickerOutcome> {
    let Some(path) = opts.host.as_deref() else {
        return run_picker(config.hosts().to_vec()).await;
    };

    let host = config
        .find(path)
        .ok_or_else(|| AppError::ConfigError(format!("host {path} not found")))?;
    if host.is_group() {
        return Err(AppError::ConfigError(format!(
            "{path} is a group, not a host"
        )));
    }
    Ok(PickerOutcome::Selected {
        host: host.clone(),
        mode: opts.mode.unwrap_or(SessionMode::Ssh),
    })
}

async fn run_ssh(
    chain: &TransportChain<RusshTransport>,
    terminal: StdinModeManager,
) -> Result<()> {
    let target = chain.target()?;
    let size = terminal.discipline().size_or_default();
    let shell = RemoteShell::open(&target, size).await?;

    let outcome = SessionCoordinator::new(terminal)
        .run(shell, stdin_bytes())
        .await?;
    println!();
    info!(
        "shell closed ({:?}), exit status {:?}",
        outcome.trigger, outcome.exit_status
    );
    Ok(())
}

async fn run_sftp(chain: &TransportChain<RusshTransport>, host: &HostDescriptor) -> Result<()> {
    let target = chain.target()?;
    let session = open_sftp(&target).await?;
    let fs = Arc::new(SftpRemoteFs::new(Arc::new(session)));
    let paths = PathState::init(fs.as_ref()).await?;

    let mut shell = SftpShell::new(fs, paths, &host.user, &host.host);
    shell.run(stdin_lines(), interrupt_events()).await
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(yaml: &str) -> ConfigManager {
        ConfigManager::from_yaml_str(std::path::Path::new("test.yaml"), yaml).unwrap()
    }

    #[tokio::test]
    async fn host_flag_skips_picker() {
        let config = config_with(
            r#"
- name: prod
  children:
    - name: web
      host: 10.0.0.1
      user: deploy
"#,
        );
        let opts = LaunchOptions {
            host: Some("prod/web".into()),
            mode: Some(SessionMode::Sftp),
            ..Default::default()
        };
        match select_host(&config, &opts).await.unwrap() {
            PickerOutcome::Selected { host, mode } => {
                assert_eq!(host.name, "web");
                assert_eq!(mode, SessionMode::Sftp);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn host_flag_rejects_groups_and_unknown_names() {
        let config = config_with(
            r#"
- name: prod
  children:
    - name: web
      host: 10.0.0.1
      user: deploy
"#,
        );
        for path in ["prod", "nope"] {
            let opts = LaunchOptions {
                host: Some(path.into()),
                ..Default::default()
            };
            assert!(select_host(&config, &opts).await.is_err(), "{path}");
        }
    }

    #[test]
    fn panic_payloads() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
