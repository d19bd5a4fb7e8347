use std::path::PathBuf;

use crossterm::cursor::Show;
use crossterm::execute;
use crossterm::style::{Attribute, SetAttribute};
use crossterm::terminal::{LeaveAlternateScreen, disable_raw_mode};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{AppError, Result};

pub fn init_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        // intentionally ignore errors here since we're already in a panic
        let _ = restore_tui();
        original_hook(panic_info);
    }));
}

/// Leave any crossterm-managed screen state the picker may have set up.
pub fn restore_tui() -> std::io::Result<()> {
    disable_raw_mode()?;
    execute!(std::io::stdout(), LeaveAlternateScreen, Show)?;
    Ok(())
}

/// Cursor-show and attribute-reset, emitted once the interactive UI phase ends.
pub fn reset_cursor_and_attributes() -> std::io::Result<()> {
    execute!(std::io::stdout(), Show, SetAttribute(Attribute::Reset))
}

pub fn init_tracing(log_level: &str) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .map(|d| d.join("hopshell"))
        .unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&log_dir).map_err(|e| {
        AppError::ConfigError(format!(
            "Failed to create log directory {}: {}",
            log_dir.display(),
            e
        ))
    })?;

    let file_appender = tracing_appender::rolling::never(&log_dir, "hopshell.log");

    // Create a non-blocking writer for better performance
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Priority: RUST_LOG env var > command line arg > default (info)
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let fmt_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| AppError::ConfigError(format!("Failed to initialize tracing: {}", e)))?;

    // Logging lasts for the whole program
    std::mem::forget(guard);

    Ok(())
}

/// Expand a leading `~` or `~/` against the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Last path component, for both `/`-separated remote paths and local paths.
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Render unix permission bits as `drwxr-xr-x`.
pub fn mode_string(is_dir: bool, is_symlink: bool, permissions: u32) -> String {
    let mut out = String::with_capacity(10);
    out.push(if is_symlink {
        'l'
    } else if is_dir {
        'd'
    } else {
        '-'
    });
    for shift in [6u32, 3, 0] {
        let bits = (permissions >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

/// `ls`-style modification time, e.g. `Jan 02 15:04`.
pub fn format_mtime(secs: u64) -> String {
    chrono::DateTime::from_timestamp(secs as i64, 0)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%b %d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "            ".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_string_renders_permissions() {
        assert_eq!(mode_string(true, false, 0o755), "drwxr-xr-x");
        assert_eq!(mode_string(false, false, 0o640), "-rw-r-----");
        assert_eq!(mode_string(false, true, 0o777), "lrwxrwxrwx");
    }

    #[test]
    fn base_name_handles_trailing_slash() {
        assert_eq!(base_name("/a/b/c.txt"), "c.txt");
        assert_eq!(base_name("/a/b/"), "b");
        assert_eq!(base_name("file"), "file");
        assert_eq!(base_name("/"), "/");
    }

    #[test]
    fn expand_tilde_leaves_plain_paths() {
        assert_eq!(expand_tilde("/etc/hosts"), PathBuf::from("/etc/hosts"));
        assert_eq!(expand_tilde("~user/x"), PathBuf::from("~user/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/.ssh/id_rsa"), home.join(".ssh/id_rsa"));
        }
    }
}
