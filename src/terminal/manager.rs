//! Owner of the "is the terminal raw" state.
//!
//! Every raw/cooked transition in the process goes through a single
//! [`TerminalModeManager`]. The original terminal attributes are captured on
//! the first [`TerminalModeManager::enter_raw`] only and reused by every later
//! restore, so repeated enter/restore cycles always return to the true baseline.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::discipline::TerminalDiscipline;
use super::{ResizeSink, resize};
use crate::error::{AppError, Result};

struct ModeState<A, S> {
    raw: bool,
    bound: Option<S>,
    original: Option<A>,
    stop: Option<CancellationToken>,
}

pub struct TerminalModeManager<D: TerminalDiscipline, S> {
    discipline: Arc<D>,
    state: Arc<Mutex<ModeState<D::Attributes, S>>>,
}

impl<D: TerminalDiscipline, S> Clone for TerminalModeManager<D, S> {
    fn clone(&self) -> Self {
        Self {
            discipline: Arc::clone(&self.discipline),
            state: Arc::clone(&self.state),
        }
    }
}

impl<D: TerminalDiscipline, S: ResizeSink> TerminalModeManager<D, S> {
    pub fn new(discipline: Arc<D>) -> Self {
        Self {
            discipline,
            state: Arc::new(Mutex::new(ModeState {
                raw: false,
                bound: None,
                original: None,
                stop: None,
            })),
        }
    }

    pub fn discipline(&self) -> &Arc<D> {
        &self.discipline
    }

    // A panic while holding the lock leaves the state consistent enough to restore.
    fn lock(&self) -> MutexGuard<'_, ModeState<D::Attributes, S>> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Switch the terminal to raw mode and bind `session` to it.
    ///
    /// Fails with [`AppError::AlreadyRaw`] if a session is already bound, leaving
    /// that binding untouched. Starts the resize forwarder, which also sends the
    /// current size once.
    pub fn enter_raw(&self, session: S) -> Result<()> {
        let stop = CancellationToken::new();
        {
            let mut state = self.lock();
            if state.raw {
                return Err(AppError::AlreadyRaw);
            }
            // The tty syscalls stay under the lock so check-and-bind is atomic;
            // neither blocks.
            if state.original.is_none() {
                state.original = Some(self.discipline.capture()?);
            }
            self.discipline.make_raw()?;
            debug!("terminal raw, bound session {}", session.id());
            state.raw = true;
            state.bound = Some(session);
            state.stop = Some(stop.clone());
        }
        resize::spawn_forwarder(self.clone(), stop);
        Ok(())
    }

    /// Return the terminal to its captured original attributes. Idempotent.
    ///
    /// The raw flag and bound session are cleared before the attributes are
    /// written back so a racing resize sees "not raw" and does nothing. The
    /// resize forwarder is signalled but not awaited.
    pub fn restore(&self) -> Result<()> {
        let (stop, original) = {
            let mut state = self.lock();
            if !state.raw {
                return Ok(());
            }
            state.raw = false;
            state.bound = None;
            (state.stop.take(), state.original.clone())
        };

        if let Some(stop) = stop {
            stop.cancel();
        }

        match original {
            Some(attrs) => {
                self.discipline.restore(&attrs)?;
                debug!("terminal restored");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// [`restore`](Self::restore), downgrading a failure to a logged warning.
    pub fn restore_or_warn(&self) {
        if let Err(e) = self.restore() {
            warn!("failed to restore terminal: {}", e);
            eprintln!("Warning: failed to restore terminal: {e}");
        }
    }

    pub fn in_raw(&self) -> bool {
        self.lock().raw
    }

    pub fn bound_session_id(&self) -> Option<u64> {
        self.lock().bound.as_ref().map(|s| s.id())
    }

    /// The session to forward resizes to, if raw mode is active.
    pub(crate) fn active_session(&self) -> Option<S> {
        let state = self.lock();
        if state.raw { state.bound.clone() } else { None }
    }

    /// Guard that restores the terminal when dropped, including during unwinding.
    pub fn restore_on_drop(&self) -> RestoreOnDrop<D, S> {
        RestoreOnDrop {
            manager: self.clone(),
        }
    }
}

pub struct RestoreOnDrop<D: TerminalDiscipline, S: ResizeSink> {
    manager: TerminalModeManager<D, S>,
}

impl<D: TerminalDiscipline, S: ResizeSink> Drop for RestoreOnDrop<D, S> {
    fn drop(&mut self) {
        self.manager.restore_or_warn();
    }
}
