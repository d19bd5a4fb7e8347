use std::io::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::utils::format_bytes;

const BAR_WIDTH: usize = 30;
const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

/// Receives byte counts from the transfer engine.
pub trait ProgressReporter: Send + Sync {
    /// A new file begins. `index` is 1-based within a batch of `count`.
    fn start_file(&self, index: usize, count: usize, name: &str, total: u64);

    fn advance(&self, bytes: u64);

    fn finish_file(&self);
}

/// Discards everything.
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn start_file(&self, _index: usize, _count: usize, _name: &str, _total: u64) {}

    fn advance(&self, _bytes: u64) {}

    fn finish_file(&self) {}
}

#[derive(Default)]
struct BarState {
    label: String,
    total: u64,
    done: u64,
    last_draw: Option<Instant>,
}

/// Single-line progress bar on stderr, redrawn at most every 100ms.
#[derive(Default)]
pub struct ConsoleProgress {
    state: Mutex<BarState>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn draw(state: &BarState) {
        let line = render_bar(&state.label, state.done, state.total);
        let mut err = std::io::stderr().lock();
        let _ = write!(err, "\r\x1b[K{line}");
        let _ = err.flush();
    }
}

impl ProgressReporter for ConsoleProgress {
    fn start_file(&self, index: usize, count: usize, name: &str, total: u64) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        *state = BarState {
            label: format!("[{index}/{count}] {name}"),
            total,
            done: 0,
            last_draw: Some(Instant::now()),
        };
        Self::draw(&state);
    }

    fn advance(&self, bytes: u64) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.done = state.done.saturating_add(bytes);
        let due = state
            .last_draw
            .is_none_or(|t| t.elapsed() >= REDRAW_INTERVAL);
        if due {
            state.last_draw = Some(Instant::now());
            Self::draw(&state);
        }
    }

    fn finish_file(&self) {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        Self::draw(&state);
        let _ = writeln!(std::io::stderr());
    }
}

/// `label [=====>    ] 1.2 MB/3.4 MB`
pub fn render_bar(label: &str, done: u64, total: u64) -> String {
    let filled = if total == 0 {
        BAR_WIDTH
    } else {
        ((done.min(total) as u128 * BAR_WIDTH as u128) / total as u128) as usize
    };
    let mut bar = String::with_capacity(BAR_WIDTH);
    for i in 0..BAR_WIDTH {
        bar.push(if i + 1 < filled {
            '='
        } else if i + 1 == filled {
            '>'
        } else {
            ' '
        });
    }
    format!(
        "{label} [{bar}] {}/{}",
        format_bytes(done),
        format_bytes(total)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_fill() {
        let empty = render_bar("f", 0, 100);
        assert!(empty.starts_with("f [ "));
        assert!(!empty.contains('='));

        let half = render_bar("f", 50, 100);
        assert_eq!(half.matches('=').count(), 14);
        assert!(half.contains('>'));

        let full = render_bar("f", 100, 100);
        assert_eq!(full.matches('=').count(), BAR_WIDTH - 1);
        assert!(full.contains(">]"));
    }

    #[test]
    fn empty_file_draws_full_bar() {
        let line = render_bar("[1/1] empty", 0, 0);
        assert!(line.contains(">]"));
    }
}
