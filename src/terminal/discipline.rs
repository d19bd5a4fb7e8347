use crate::error::{AppError, Result};

pub const FALLBACK_SIZE: (u16, u16) = (80, 24);

/// Low-level control over the controlling terminal's line discipline.
pub trait TerminalDiscipline: Send + Sync + 'static {
    /// Opaque saved terminal state.
    type Attributes: Clone + Send + 'static;

    fn capture(&self) -> Result<Self::Attributes>;

    /// Switch to unbuffered, no-echo input.
    fn make_raw(&self) -> Result<()>;

    fn restore(&self, attrs: &Self::Attributes) -> Result<()>;

    /// Current `(cols, rows)`, if the terminal reports one.
    fn size(&self) -> Option<(u16, u16)>;

    fn size_or_default(&self) -> (u16, u16) {
        self.size()
            .filter(|(c, r)| *c > 0 && *r > 0)
            .unwrap_or(FALLBACK_SIZE)
    }
}

/// The process's standard input terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinTerminal;

#[cfg(unix)]
impl StdinTerminal {
    fn set(attrs: &libc::termios) -> Result<()> {
        // SAFETY: attrs is a fully initialized termios obtained from tcgetattr.
        let rc = unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, attrs) };
        if rc != 0 {
            return Err(AppError::TerminalError(format!(
                "tcsetattr: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

#[cfg(unix)]
impl TerminalDiscipline for StdinTerminal {
    type Attributes = libc::termios;

    fn capture(&self) -> Result<libc::termios> {
        let mut attrs = std::mem::MaybeUninit::<libc::termios>::uninit();
        // SAFETY: tcgetattr fully initializes the struct when it returns 0.
        let rc = unsafe { libc::tcgetattr(libc::STDIN_FILENO, attrs.as_mut_ptr()) };
        if rc != 0 {
            return Err(AppError::TerminalError(format!(
                "tcgetattr: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(unsafe { attrs.assume_init() })
    }

    fn make_raw(&self) -> Result<()> {
        let mut attrs = self.capture()?;
        // SAFETY: attrs is initialized; cfmakeraw only edits flag fields.
        unsafe { libc::cfmakeraw(&mut attrs) };
        Self::set(&attrs)
    }

    fn restore(&self, attrs: &libc::termios) -> Result<()> {
        Self::set(attrs)
    }

    fn size(&self) -> Option<(u16, u16)> {
        crossterm::terminal::size().ok()
    }
}

#[cfg(not(unix))]
impl TerminalDiscipline for StdinTerminal {
    type Attributes = ();

    fn capture(&self) -> Result<()> {
        Ok(())
    }

    fn make_raw(&self) -> Result<()> {
        crossterm::terminal::enable_raw_mode()
            .map_err(|e| AppError::TerminalError(format!("enable raw mode: {e}")))
    }

    fn restore(&self, _attrs: &()) -> Result<()> {
        crossterm::terminal::disable_raw_mode()
            .map_err(|e| AppError::TerminalError(format!("disable raw mode: {e}")))
    }

    fn size(&self) -> Option<(u16, u16)> {
        crossterm::terminal::size().ok()
    }
}
