//! Lock Manager
//!
//! Distributed locks built purely from conditional writes and TTL expiry:
//! acquisition is an atomic create of the lock key, liveness is a
//! background task re-writing the key on a wall-clock period shorter than
//! its TTL, and loss shows up as the key missing or carrying a write other
//! than our own.
//!
//! State machine per lock: Acquiring, then Held, then either Releasing
//! (caller sent on the release channel, key deleted) or Lost (single
//! notification on the lost channel, maintenance stops, the key is never
//! touched again). A lock is never re-acquired automatically.


use std::sync::Arc;
use std::time::Duration;

use nanoid::nanoid;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::adapter::AdapterInner;
use crate::adapter::RequestExecutor;
use crate::adapter::TaskHandle;
use crate::adapter::TaskRegistry;
use crate::constants::LOCK_NAMESPACE;
use crate::constants::SIGNAL_CHANNEL_CAPACITY;
use crate::metrics::LOCKS_HELD_METRIC;
use crate::metrics::LOCKS_LOST_METRIC;
use crate::metrics::LOCK_REFRESH_FAILURES_METRIC;
use crate::BackendError;
use crate::Result;
use crate::StoreBackend;
use crate::StoreError;

/// Blocks until the named lock is acquired, then spawns its maintenance
/// task.
///
/// Contention retries forever with jittered backoff; anything else aborts
/// acquisition and returns the mapped error. A zero TTL fails with
/// [`StoreError::InvalidTtl`] before any backend traffic.
pub(crate) async fn acquire_and_maintain(
    inner: &Arc<AdapterInner>,
    lock_name: &str,
    lock_ttl: u64,
) -> Result<(mpsc::Receiver<bool>, mpsc::Sender<bool>)> {
    if lock_ttl == 0 {
        return Err(StoreError::InvalidTtl);
    }

    let key = format!("{}/{}", LOCK_NAMESPACE, lock_name);
    // Per-acquisition owner token, so a tampered value is distinguishable
    // from our own writes when diagnosing a lost lock.
    let owner = nanoid!();

    let held_index = loop {
        let backend = inner.backend.clone();
        let create_key = key.clone();
        let create_value = owner.clone().into_bytes();
        let attempt = inner
            .executor
            .dispatch(Some(inner.config.request_timeout()), async move {
                backend
                    .create_if_absent(&create_key, create_value, lock_ttl)
                    .await
            })
            .await;

        match attempt {
            Ok(raw) => break raw.modified_index,
            Err(BackendError::KeyExists { .. }) => {
                tokio::time::sleep(jittered(inner.config.lock_retry_interval())).await;
            }
            Err(e) => return Err(e.into()),
        }
    };
    debug!("lock {} acquired at index {}", key, held_index);

    let (lost_tx, lost_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
    let (release_tx, release_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);

    let id = inner.next_task_id();
    let cancel = CancellationToken::new();
    let keeper = LockKeeper {
        backend: inner.backend.clone(),
        executor: inner.executor.clone(),
        request_timeout: inner.config.request_timeout(),
        key,
        owner,
        ttl_secs: lock_ttl,
        last_index: held_index,
        lost_tx,
        release_rx,
        cancel: cancel.clone(),
        registry: inner.locks.clone(),
        id,
    };
    let handle = tokio::spawn(keeper.run());
    inner.locks.insert(id, TaskHandle { cancel, handle });

    Ok((lost_rx, release_tx))
}

fn jittered(base: Duration) -> Duration {
    let mut rng = StdRng::from_entropy();
    let bound = (base.as_millis() as u64 / 2).max(1);
    base + Duration::from_millis(rng.gen_range(0..bound))
}

struct LockKeeper {
    backend: Arc<dyn StoreBackend>,
    executor: RequestExecutor,
    request_timeout: Duration,
    key: String,
    owner: String,
    ttl_secs: u64,
    /// Index of our latest write to the key; any other write means the
    /// lock is no longer ours
    last_index: u64,
    lost_tx: mpsc::Sender<bool>,
    release_rx: mpsc::Receiver<bool>,
    cancel: CancellationToken,
    registry: TaskRegistry,
    id: u64,
}

impl LockKeeper {
    async fn run(mut self) {
        LOCKS_HELD_METRIC.inc();

        // Refresh on a wall-clock period of half the TTL; Delay keeps the
        // cadence periodic rather than bursty after a stall.
        let period = Duration::from_millis(self.ttl_secs.saturating_mul(1000) / 2);
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("lock {} released on disconnect", self.key);
                    self.release().await;
                    break;
                }

                // A message is a voluntary release; so is the caller
                // dropping the release sender.
                _ = self.release_rx.recv() => {
                    debug!("lock {} released by caller", self.key);
                    self.release().await;
                    break;
                }

                _ = interval.tick() => {
                    if let Err(reason) = self.refresh().await {
                        warn!("lock {} lost: {}", self.key, reason);
                        LOCKS_LOST_METRIC.inc();
                        let _ = self.lost_tx.try_send(true);
                        break;
                    }
                }
            }
        }

        LOCKS_HELD_METRIC.dec();
        self.registry.remove(&self.id);
    }

    /// Confirms the key still carries our latest write, then re-writes it
    /// to push the expiry out.
    async fn refresh(&mut self) -> std::result::Result<(), String> {
        let backend = self.backend.clone();
        let key = self.key.clone();
        let current = self
            .executor
            .dispatch(Some(self.request_timeout), async move {
                backend.get(&key).await
            })
            .await;

        match current {
            Ok(raw) => {
                if raw.modified_index != self.last_index || raw.value != self.owner.as_bytes() {
                    LOCK_REFRESH_FAILURES_METRIC
                        .with_label_values(&["tampered"])
                        .inc();
                    return Err(format!(
                        "key carries write {} instead of ours ({})",
                        raw.modified_index, self.last_index
                    ));
                }
            }
            Err(BackendError::KeyNotFound { .. }) => {
                LOCK_REFRESH_FAILURES_METRIC
                    .with_label_values(&["missing"])
                    .inc();
                return Err("key expired or was deleted".to_string());
            }
            Err(e) => {
                LOCK_REFRESH_FAILURES_METRIC
                    .with_label_values(&["backend"])
                    .inc();
                return Err(e.to_string());
            }
        }

        let backend = self.backend.clone();
        let key = self.key.clone();
        let value = self.owner.clone().into_bytes();
        let ttl = self.ttl_secs;
        let written = self
            .executor
            .dispatch(Some(self.request_timeout), async move {
                backend.set(&key, value, ttl).await
            })
            .await;

        match written {
            Ok(raw) => {
                self.last_index = raw.modified_index;
                Ok(())
            }
            Err(e) => {
                LOCK_REFRESH_FAILURES_METRIC
                    .with_label_values(&["backend"])
                    .inc();
                Err(e.to_string())
            }
        }
    }

    /// Deletes our lock key. Only called while the lock is still ours;
    /// after a loss the key is never touched.
    async fn release(&self) {
        let backend = self.backend.clone();
        let key = self.key.clone();
        let deleted = self
            .executor
            .dispatch(Some(self.request_timeout), async move {
                backend.delete(&key, false).await
            })
            .await;

        if let Err(e) = deleted {
            warn!("failed to delete lock {} on release: {}", self.key, e);
        }
    }
}
