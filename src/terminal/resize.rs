//! Relays local window-size changes to the session bound to raw mode.

use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::discipline::TerminalDiscipline;
use super::manager::TerminalModeManager;
use super::ResizeSink;

/// Upper bound on a single forward; a closing transport can stall it forever.
pub const RESIZE_FORWARD_TIMEOUT: Duration = Duration::from_millis(100);

/// Spawn the forwarder for one raw-mode window. It sends the current size once,
/// then one update per resize notification, and exits when `stop` is cancelled.
pub(crate) fn spawn_forwarder<D, S>(manager: TerminalModeManager<D, S>, stop: CancellationToken)
where
    D: TerminalDiscipline,
    S: ResizeSink,
{
    tokio::spawn(async move {
        forward_once(&manager).await;
        watch_signals(&manager, &stop).await;
        debug!("resize forwarder stopped");
    });
}

#[cfg(unix)]
async fn watch_signals<D, S>(manager: &TerminalModeManager<D, S>, stop: &CancellationToken)
where
    D: TerminalDiscipline,
    S: ResizeSink,
{
    use tokio::signal::unix::{SignalKind, signal};

    let mut winch = match signal(SignalKind::window_change()) {
        Ok(s) => s,
        Err(e) => {
            warn!("cannot listen for window changes: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            received = winch.recv() => {
                if received.is_none() {
                    break;
                }
                forward_once(manager).await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn watch_signals<D, S>(_manager: &TerminalModeManager<D, S>, stop: &CancellationToken)
where
    D: TerminalDiscipline,
    S: ResizeSink,
{
    stop.cancelled().await;
}

/// Forward the current size to the bound session, if raw mode is still active.
/// The session is cloned out under the lock; the call itself runs outside it.
pub(crate) async fn forward_once<D, S>(manager: &TerminalModeManager<D, S>)
where
    D: TerminalDiscipline,
    S: ResizeSink,
{
    let Some(session) = manager.active_session() else {
        return;
    };
    let Some((cols, rows)) = manager.discipline().size() else {
        return;
    };

    match timeout(RESIZE_FORWARD_TIMEOUT, session.resize(cols, rows)).await {
        Ok(Ok(())) => debug!("forwarded window size {}x{}", cols, rows),
        Ok(Err(e)) => debug!("window size forward failed: {}", e),
        Err(_) => debug!("window size forward timed out, abandoned"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;
    use crate::testing::{FakeTerminal, RecordingSink};

    #[tokio::test]
    async fn forwards_size_while_raw() {
        let term = FakeTerminal::new(0);
        let mgr: TerminalModeManager<_, RecordingSink> = TerminalModeManager::new(Arc::clone(&term));
        let sink = RecordingSink::new(1);

        mgr.enter_raw(sink.clone()).unwrap();
        *term.size.lock().unwrap() = Some((100, 30));
        forward_once(&mgr).await;
        mgr.restore().unwrap();

        assert!(sink.resizes().contains(&(100, 30)));
    }

    #[tokio::test]
    async fn no_forward_after_restore() {
        let term = FakeTerminal::new(0);
        let mgr: TerminalModeManager<_, RecordingSink> = TerminalModeManager::new(Arc::clone(&term));
        let sink = RecordingSink::new(1);

        mgr.enter_raw(sink.clone()).unwrap();
        mgr.restore().unwrap();
        let before = sink.resizes().len();
        forward_once(&mgr).await;

        assert_eq!(sink.resizes().len(), before);
    }

    #[tokio::test]
    async fn stalled_forward_is_abandoned() {
        let term = FakeTerminal::new(0);
        let mgr: TerminalModeManager<_, RecordingSink> = TerminalModeManager::new(Arc::clone(&term));

        mgr.enter_raw(RecordingSink::hanging(1)).unwrap();
        let started = Instant::now();
        forward_once(&mgr).await;
        assert!(started.elapsed() < Duration::from_secs(2));

        mgr.restore().unwrap();
    }
}
