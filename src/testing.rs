//! Shared test doubles for the terminal and session seams.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{AppError, Result};
use crate::terminal::{ResizeSink, TerminalDiscipline};

const RAW: u32 = 0xFF;

/// In-memory terminal whose "mode" is a number: `capture` reads it,
/// `make_raw` sets it to a sentinel, `restore` writes the saved value back.
#[derive(Debug)]
pub struct FakeTerminal {
    pub mode: Mutex<u32>,
    pub captures: AtomicUsize,
    pub restores: AtomicUsize,
    pub fail_make_raw: AtomicBool,
    pub size: Mutex<Option<(u16, u16)>>,
}

impl FakeTerminal {
    pub fn new(initial_mode: u32) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(initial_mode),
            captures: AtomicUsize::new(0),
            restores: AtomicUsize::new(0),
            fail_make_raw: AtomicBool::new(false),
            size: Mutex::new(Some((120, 40))),
        })
    }

    pub fn mode(&self) -> u32 {
        *self.mode.lock().unwrap()
    }

    pub fn is_raw(&self) -> bool {
        self.mode() == RAW
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn restores(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }
}

impl TerminalDiscipline for FakeTerminal {
    type Attributes = u32;

    fn capture(&self) -> Result<u32> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(self.mode())
    }

    fn make_raw(&self) -> Result<()> {
        if self.fail_make_raw.load(Ordering::SeqCst) {
            return Err(AppError::TerminalError("not a tty".into()));
        }
        *self.mode.lock().unwrap() = RAW;
        Ok(())
    }

    fn restore(&self, attrs: &u32) -> Result<()> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        *self.mode.lock().unwrap() = *attrs;
        Ok(())
    }

    fn size(&self) -> Option<(u16, u16)> {
        *self.size.lock().unwrap()
    }
}

/// Session stand-in that records resize requests, optionally never completing them.
#[derive(Clone, Debug)]
pub struct RecordingSink {
    pub id: u64,
    pub resizes: Arc<Mutex<Vec<(u16, u16)>>>,
    pub hang: bool,
}

impl RecordingSink {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            resizes: Arc::new(Mutex::new(Vec::new())),
            hang: false,
        }
    }

    pub fn hanging(id: u64) -> Self {
        Self {
            hang: true,
            ..Self::new(id)
        }
    }

    pub fn resizes(&self) -> Vec<(u16, u16)> {
        self.resizes.lock().unwrap().clone()
    }
}

impl ResizeSink for RecordingSink {
    fn id(&self) -> u64 {
        self.id
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.resizes.lock().unwrap().push((cols, rows));
        Ok(())
    }
}
