//! Background polling of the snapshot provider.
//!
//! The loop never touches the terminal. After each successful
//! `ViewState::replace_all` it queues `UiEvent::Refreshed` for the UI task,
//! which is the only place rendering state changes. Process detail lookups
//! are delivered the same way.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cli::fetch::{ProcessInspector, SnapshotProvider};
use crate::cli::state::ViewState;
use crate::cli::types::{ConnectionRecord, ProcessDetails};

/// Work queued for the UI task.
#[derive(Debug)]
pub enum UiEvent {
    Input(crossterm::event::Event),
    /// New data was installed in the view state; redraw and fix up selection.
    Refreshed,
    /// Metadata for the owner of `record`, or the lookup error.
    Details(ConnectionRecord, Result<ProcessDetails, String>),
    InputClosed,
}

/// Runs one fetch on the blocking pool and installs the result.
///
/// Returns false when the provider failed; the previous view stays as it was.
pub async fn poll_once(provider: &Arc<dyn SnapshotProvider>, state: &ViewState) -> bool {
    let provider = Arc::clone(provider);
    match tokio::task::spawn_blocking(move || provider.fetch()).await {
        Ok(Ok(records)) => {
            log::debug!("poll returned {} records", records.len());
            state.replace_all(records);
            true
        }
        Ok(Err(e)) => {
            log::warn!("poll failed, keeping previous data: {e:#}");
            false
        }
        Err(e) => {
            log::warn!("poll task failed: {e}");
            false
        }
    }
}

/// Keeps the previous row if it still exists, otherwise falls back to the first row.
pub fn reconcile_selection(previous: Option<usize>, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    match previous {
        Some(i) if i < len => Some(i),
        _ => Some(0),
    }
}

/// Handle to the periodic poller. Dropping it stops the loop.
pub struct RefreshHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Stops the loop and waits for an in-flight poll to finish.
    pub async fn stop(self) {
        self.stop.send_replace(true);
        if let Err(e) = self.task.await {
            log::warn!("refresh loop ended abnormally: {e}");
        }
    }
}

/// Polls immediately, then every `interval`, until stopped.
pub fn spawn_refresh_loop(
    provider: Arc<dyn SnapshotProvider>,
    state: ViewState,
    interval: Duration,
    events: mpsc::UnboundedSender<UiEvent>,
) -> RefreshHandle {
    let (stop, mut stop_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = stop_rx.wait_for(|stopped| *stopped) => break,
                _ = ticker.tick() => {}
            }
            if poll_once(&provider, &state).await && events.send(UiEvent::Refreshed).is_err() {
                break;
            }
        }
        log::debug!("refresh loop stopped");
    });
    RefreshHandle { stop, task }
}

/// One out-of-band poll on its own task, so a slow provider never stalls the UI.
pub fn spawn_manual_refresh(
    provider: Arc<dyn SnapshotProvider>,
    state: ViewState,
    events: mpsc::UnboundedSender<UiEvent>,
) -> JoinHandle<bool> {
    tokio::spawn(async move {
        log::info!("manual refresh requested");
        let ok = poll_once(&provider, &state).await;
        if ok {
            let _ = events.send(UiEvent::Refreshed);
        }
        ok
    })
}

/// Looks up the owner of `record` on the blocking pool and queues the result.
pub fn spawn_details_lookup(
    inspector: Arc<dyn ProcessInspector>,
    record: ConnectionRecord,
    events: mpsc::UnboundedSender<UiEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let pid = record.pid;
        let details = match tokio::task::spawn_blocking(move || inspector.describe(pid)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = &details {
            log::debug!("details lookup for pid {pid} failed: {e}");
        }
        let _ = events.send(UiEvent::Details(record, details));
    })
}
