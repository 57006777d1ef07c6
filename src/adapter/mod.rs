//! Adapter module for coordination over a consensus-backed store
//!
//! Provides the caller-facing surface of the crate:
//! - [`StoreAdapter`] - Main entry point with all store operations
//! - [`StoreAdapterBuilder`] - Configurable adapter construction
//! - [`AdapterConfig`] - Tunables with environment loading
//! - `RequestExecutor` - Bounded-concurrency dispatch for backend requests
//!
//! # Basic Usage
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use d_store::StoreAdapter;
//! use d_store::StoreNode;
//!
//! let adapter = StoreAdapter::builder(backend)
//!     .connect_timeout(Duration::from_secs(1))
//!     .request_timeout(Duration::from_secs(3))
//!     .build();
//! adapter.connect().await?;
//!
//! adapter.create(StoreNode::leaf("/menu/breakfast", b"waffles")).await?;
//! let node = adapter.get("/menu/breakfast").await?;
//!
//! let (mut events, stop, mut errors) = adapter.watch("/menu").await?;
//! let (mut lost, release) = adapter.get_and_maintain_lock("chef", 30).await?;
//!
//! // Tears down every watch and lock task before returning
//! adapter.disconnect().await?;
//! ```

mod builder;
mod config;
mod executor;

pub use builder::*;
pub use config::*;
pub(crate) use executor::RequestExecutor;


use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use autometrics::autometrics;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::lock;
use crate::watch;
use crate::Result;
use crate::StoreBackend;
use crate::StoreError;
use crate::StoreNode;
use crate::WatchEvent;
use crate::API_SLO;

/// A long-lived background task owned by the adapter, one per active watch
/// or maintained lock.
pub(crate) struct TaskHandle {
    pub(crate) cancel: CancellationToken,
    pub(crate) handle: JoinHandle<()>,
}

pub(crate) type TaskRegistry = Arc<DashMap<u64, TaskHandle>>;

/// Main entry point for coordinating over the store
///
/// Cheap to clone; all clones share one backend, one request executor and
/// one registry of background tasks, so [`disconnect`](StoreAdapter::disconnect)
/// observed through any clone tears down everything.
///
/// Created through the [`builder()`](StoreAdapter::builder) method
#[derive(Clone)]
pub struct StoreAdapter {
    inner: Arc<AdapterInner>,
}

pub(crate) struct AdapterInner {
    pub(crate) backend: Arc<dyn StoreBackend>,
    pub(crate) executor: RequestExecutor,
    pub(crate) config: AdapterConfig,
    pub(crate) watchers: TaskRegistry,
    pub(crate) locks: TaskRegistry,
    task_ids: AtomicU64,
}

impl AdapterInner {
    pub(crate) fn next_task_id(&self) -> u64 {
        self.task_ids.fetch_add(1, Ordering::Relaxed)
    }
}

impl StoreAdapter {
    /// Create a configured adapter builder over the given backend
    pub fn builder(backend: Arc<dyn StoreBackend>) -> StoreAdapterBuilder {
        StoreAdapterBuilder::new(backend)
    }

    pub(crate) fn new(
        backend: Arc<dyn StoreBackend>,
        config: AdapterConfig,
    ) -> Self {
        let executor = RequestExecutor::new(config.max_in_flight);
        Self {
            inner: Arc::new(AdapterInner {
                backend,
                executor,
                config,
                watchers: Arc::new(DashMap::new()),
                locks: Arc::new(DashMap::new()),
                task_ids: AtomicU64::new(1),
            }),
        }
    }

    /// Probes the store for reachability.
    ///
    /// Idempotent; holds no connection state of its own. Fails with
    /// [`StoreError::Timeout`] when the store does not answer within the
    /// configured connect timeout.
    #[autometrics(objective = API_SLO)]
    pub async fn connect(&self) -> Result<()> {
        let backend = self.inner.backend.clone();
        let index = self
            .inner
            .executor
            .dispatch(Some(self.inner.config.connect_timeout()), async move {
                backend.current_index().await
            })
            .await?;
        debug!("connected, store index at {}", index);
        Ok(())
    }

    /// Atomically creates a leaf node with the node's TTL.
    ///
    /// Missing parent directories come into existence implicitly. Fails
    /// with [`StoreError::KeyExists`] when anything already occupies the
    /// path.
    #[autometrics(objective = API_SLO)]
    pub async fn create(
        &self,
        node: StoreNode,
    ) -> Result<()> {
        let StoreNode {
            key, value, ttl, ..
        } = node;
        let backend = self.inner.backend.clone();
        self.inner
            .executor
            .dispatch(Some(self.inner.config.request_timeout()), async move {
                backend.create_if_absent(&key, value, ttl).await
            })
            .await?;
        Ok(())
    }

    /// Writes every node in the batch, creating or overwriting leaves.
    ///
    /// All writes are dispatched regardless of sibling failures; once every
    /// one has settled, the first failure in input order is returned.
    /// Callers must treat an error as "state partially unknown" and
    /// re-query.
    #[autometrics(objective = API_SLO)]
    pub async fn set_multi(
        &self,
        nodes: Vec<StoreNode>,
    ) -> Result<()> {
        let deadline = Some(self.inner.config.request_timeout());
        let writes = nodes.into_iter().map(|node| {
            let backend = self.inner.backend.clone();
            let executor = self.inner.executor.clone();
            async move {
                let StoreNode {
                    key, value, ttl, ..
                } = node;
                executor
                    .dispatch(deadline, async move { backend.set(&key, value, ttl).await })
                    .await
            }
        });

        for settled in join_all(writes).await {
            settled?;
        }
        Ok(())
    }

    /// Reads the leaf node at `key`.
    ///
    /// Fails with [`StoreError::NodeIsDirectory`] when the key names a
    /// directory.
    #[autometrics(objective = API_SLO)]
    pub async fn get(
        &self,
        key: &str,
    ) -> Result<StoreNode> {
        let backend = self.inner.backend.clone();
        let owned = key.to_string();
        let raw = self
            .inner
            .executor
            .dispatch(Some(self.inner.config.request_timeout()), async move {
                backend.get(&owned).await
            })
            .await?;

        if raw.dir {
            return Err(StoreError::NodeIsDirectory);
        }
        Ok(raw.into())
    }

    /// Reads the whole subtree rooted at `key` as one directory node with
    /// nested children.
    ///
    /// A directory with no children yields `child_nodes: Some(vec![])`.
    /// Fails with [`StoreError::NodeIsNotDirectory`] when the key names a
    /// leaf.
    #[autometrics(objective = API_SLO)]
    pub async fn list_recursively(
        &self,
        key: &str,
    ) -> Result<StoreNode> {
        let backend = self.inner.backend.clone();
        let owned = key.to_string();
        let raw = self
            .inner
            .executor
            .dispatch(Some(self.inner.config.request_timeout()), async move {
                backend.list_directory(&owned, true).await
            })
            .await?;

        if !raw.dir {
            return Err(StoreError::NodeIsNotDirectory);
        }
        Ok(raw.into())
    }

    /// Deletes every listed key, descendants included.
    ///
    /// Deletions fan out like [`set_multi`](StoreAdapter::set_multi):
    /// everything is dispatched, and the first failure in input order is
    /// reported after all have settled.
    #[autometrics(objective = API_SLO)]
    pub async fn delete(
        &self,
        keys: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<()> {
        let deadline = Some(self.inner.config.request_timeout());
        let deletes: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let backend = self.inner.backend.clone();
                let executor = self.inner.executor.clone();
                let owned = key.as_ref().to_string();
                async move {
                    executor
                        .dispatch(deadline, async move { backend.delete(&owned, true).await })
                        .await
                }
            })
            .collect();

        for settled in join_all(deletes).await {
            settled?;
        }
        Ok(())
    }

    /// Watches `key` and every slash-separated descendant for changes.
    ///
    /// Returns the event stream, a stop handle, and the error stream.
    /// Events arrive in backend index order; falling behind the store's
    /// retained history window skips events silently; a terminal failure
    /// surfaces exactly one error before both channels close.
    #[autometrics(objective = API_SLO)]
    pub async fn watch(
        &self,
        key: &str,
    ) -> Result<(
        mpsc::Receiver<WatchEvent>,
        mpsc::Sender<bool>,
        mpsc::Receiver<StoreError>,
    )> {
        watch::spawn_watcher(&self.inner, key).await
    }

    /// Acquires the named lock, blocking through contention, then maintains
    /// it in the background until released or lost.
    ///
    /// Returns the loss notification stream and the release handle. A TTL
    /// of zero fails with [`StoreError::InvalidTtl`] before any backend
    /// traffic.
    #[autometrics(objective = API_SLO)]
    pub async fn get_and_maintain_lock(
        &self,
        lock_name: &str,
        lock_ttl: u64,
    ) -> Result<(mpsc::Receiver<bool>, mpsc::Sender<bool>)> {
        lock::acquire_and_maintain(&self.inner, lock_name, lock_ttl).await
    }

    /// Tears down every active watch and maintained lock, then shuts the
    /// request executor down.
    ///
    /// Held locks are released on the way out. Returns only after every
    /// background task has terminated, so all watch and lock channels are
    /// observed closed by the time this resolves. Idempotent.
    #[autometrics(objective = API_SLO)]
    pub async fn disconnect(&self) -> Result<()> {
        let mut handles = Vec::new();
        for registry in [&self.inner.watchers, &self.inner.locks] {
            let ids: Vec<u64> = registry.iter().map(|entry| *entry.key()).collect();
            for id in ids {
                if let Some((_, task)) = registry.remove(&id) {
                    task.cancel.cancel();
                    handles.push(task.handle);
                }
            }
        }

        debug!("disconnecting, awaiting {} background tasks", handles.len());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("background task ended abnormally: {}", e);
            }
        }

        // Locks delete their keys during shutdown above, so the executor
        // must stay open until every task has drained.
        self.inner.executor.close();
        Ok(())
    }
}
