//! Per-title background polling of the remote service.
//!
//! One poller per actively-subscribed title, spawned on the tokio runtime
//! and stopped through its own cancellation token. At most one fetch is in
//! flight at a time; ticks that fire during an outstanding fetch are skipped
//! rather than queued.

use crate::error::{ApiError, SyncError};
use crate::model::Note;
use crate::remote::NoteApi;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Handle to a running poller. Cancelling stops future ticks; a fetch that
/// is already in flight may complete but its result is dropped before
/// delivery.
pub struct PollerHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl PollerHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the polling task to finish (after cancel).
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

pub struct Poller;

impl Poller {
    /// Fetch `title` once immediately, then keep fetching every `interval`
    /// until cancelled. Does not block the caller.
    ///
    /// Successful fetches arrive as `Some(note)` on `tx`; a not-found or
    /// failed fetch arrives as `None` ("no update") so the published state
    /// is never corrupted. Transport failures are additionally reported on
    /// `error_tx`, and polling continues on schedule either way.
    pub fn start(
        api: Arc<dyn NoteApi>,
        title: String,
        interval: Duration,
        tx: mpsc::UnboundedSender<Option<Note>>,
        error_tx: broadcast::Sender<SyncError>,
    ) -> PollerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let result = match api.fetch(&title).await {
                    Ok(note) => Some(note),
                    Err(ApiError::NotFound) => {
                        log::debug!("[POLL] '{}' has no remote record", title);
                        None
                    }
                    Err(ApiError::Transport(detail)) => {
                        log::warn!("[POLL] fetch for '{}' failed: {}", title, detail);
                        let _ = error_tx.send(SyncError::Fetch {
                            title: title.clone(),
                            detail,
                        });
                        None
                    }
                };

                // No delivery after cancellation, even for a fetch that was
                // already in flight when the token fired.
                if token.is_cancelled() {
                    break;
                }
                if tx.send(result).is_err() {
                    // Receiver gone: the view was torn down.
                    break;
                }
            }

            log::debug!("[POLL] poller for '{}' stopped", title);
        });

        PollerHandle { cancel, task }
    }
}
