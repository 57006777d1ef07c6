//! Watch Reconciler
//!
//! Reconstructs a continuous, classified event stream for one key prefix
//! from the backend's raw notification feed.
//!
//! Each watch runs as one background task that long-polls the backend,
//! resuming after the last delivered index. When the resume point falls out
//! of the store's retained history window the task skips forward to the
//! oldest index still served and keeps streaming; missed events are logged
//! and counted, never surfaced as failures. A terminal backend failure
//! surfaces exactly one error before both caller-facing channels close.


use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::adapter::AdapterInner;
use crate::adapter::RequestExecutor;
use crate::adapter::TaskHandle;
use crate::adapter::TaskRegistry;
use crate::constants::SIGNAL_CHANNEL_CAPACITY;
use crate::metrics::WATCH_EVENTS_METRIC;
use crate::metrics::WATCH_GAP_METRIC;
use crate::BackendError;
use crate::Result;
use crate::StoreBackend;
use crate::StoreError;
use crate::WatchEvent;

/// Attaches a watch at the store's current index and spawns its streaming
/// task.
///
/// Attachment failure is synchronous: the mapped error comes back directly
/// and no channels are produced.
pub(crate) async fn spawn_watcher(
    inner: &Arc<AdapterInner>,
    key: &str,
) -> Result<(
    mpsc::Receiver<WatchEvent>,
    mpsc::Sender<bool>,
    mpsc::Receiver<StoreError>,
)> {
    let backend = inner.backend.clone();
    let attach_index = inner
        .executor
        .dispatch(Some(inner.config.request_timeout()), async move {
            backend.current_index().await
        })
        .await?;

    let (events_tx, events_rx) = mpsc::channel(inner.config.watch_buffer.max(1));
    let (stop_tx, stop_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
    let (errors_tx, errors_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);

    let id = inner.next_task_id();
    let cancel = CancellationToken::new();
    let watcher = Watcher {
        backend: inner.backend.clone(),
        executor: inner.executor.clone(),
        prefix: key.to_string(),
        after_index: attach_index,
        events_tx,
        errors_tx,
        stop_rx,
        cancel: cancel.clone(),
        registry: inner.watchers.clone(),
        id,
    };
    let handle = tokio::spawn(watcher.run());
    inner.watchers.insert(id, TaskHandle { cancel, handle });

    Ok((events_rx, stop_tx, errors_rx))
}

struct Watcher {
    backend: Arc<dyn StoreBackend>,
    executor: RequestExecutor,
    prefix: String,
    /// Index of the last event already accounted for; the next long poll
    /// asks for anything newer
    after_index: u64,
    events_tx: mpsc::Sender<WatchEvent>,
    errors_tx: mpsc::Sender<StoreError>,
    stop_rx: mpsc::Receiver<bool>,
    cancel: CancellationToken,
    registry: TaskRegistry,
    id: u64,
}

impl Watcher {
    async fn run(mut self) {
        debug!(
            "watch on {} streaming after index {}",
            self.prefix, self.after_index
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("watch on {} cancelled", self.prefix);
                    break;
                }

                // A dropped stop sender resolves to None and leaves the
                // watch running; only an actual message stops it.
                Some(_) = self.stop_rx.recv() => {
                    debug!("watch on {} stopped by caller", self.prefix);
                    break;
                }

                polled = self.executor.dispatch(
                    None,
                    self.backend.watch_next(&self.prefix, self.after_index),
                ) => {
                    match polled {
                        Ok(raw) => {
                            self.after_index = raw.index;
                            match WatchEvent::try_from(raw) {
                                Ok(event) => {
                                    if !self.deliver(event).await {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    error!(
                                        "watch on {} received a malformed notification: {}",
                                        self.prefix, e
                                    );
                                    let _ = self.errors_tx.try_send(e);
                                    break;
                                }
                            }
                        }
                        Err(BackendError::EventIndexCleared { oldest_available }) => {
                            warn!(
                                "watch on {} fell behind the history window, \
                                 skipping to index {}",
                                self.prefix, oldest_available
                            );
                            WATCH_GAP_METRIC.inc();
                            self.after_index = oldest_available.saturating_sub(1);
                        }
                        Err(e) => {
                            let mapped = StoreError::from(e);
                            error!("watch on {} failed: {}", self.prefix, mapped);
                            let _ = self.errors_tx.try_send(mapped);
                            break;
                        }
                    }
                }
            }
        }

        // Dropping the senders on return closes both caller-facing channels.
        self.registry.remove(&self.id);
    }

    /// Hands one event to the consumer.
    ///
    /// The send is raced against stop and cancel so a full channel never
    /// delays shutdown. Returns false when the watch should end.
    async fn deliver(
        &mut self,
        event: WatchEvent,
    ) -> bool {
        let event_type = event.event_type.as_str();
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            Some(_) = self.stop_rx.recv() => false,
            sent = self.events_tx.send(event) => match sent {
                Ok(()) => {
                    WATCH_EVENTS_METRIC.with_label_values(&[event_type]).inc();
                    true
                }
                // Consumer dropped the events receiver
                Err(_) => false,
            },
        }
    }
}
