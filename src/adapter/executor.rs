use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::BackendError;
use crate::BackendResult;

/// Caps the number of backend requests in flight at once.
///
/// Every backend call the adapter makes, from unary reads to watch long
/// polls, runs under one of these permits. Permits are granted in FIFO
/// order, so a burst of writes cannot starve later callers.
#[derive(Clone)]
pub(crate) struct RequestExecutor {
    permits: Arc<Semaphore>,
}

impl RequestExecutor {
    pub(crate) fn new(max_in_flight: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
        }
    }

    /// Runs one backend request under a permit.
    ///
    /// With a `deadline`, the request is abandoned once it elapses and the
    /// caller sees [`BackendError::Unreachable`]. Long polls pass `None`
    /// and are bounded by cancellation instead.
    pub(crate) async fn dispatch<T, F>(
        &self,
        deadline: Option<Duration>,
        request: F,
    ) -> BackendResult<T>
    where
        F: Future<Output = BackendResult<T>> + Send,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| BackendError::Unreachable {
                reason: "adapter disconnected".to_string(),
            })?;

        match deadline {
            Some(limit) => match tokio::time::timeout(limit, request).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Unreachable {
                    reason: format!("no response within {limit:?}"),
                }),
            },
            None => request.await,
        }
    }

    /// Shuts the executor down: pending and future permit requests fail.
    pub(crate) fn close(&self) {
        self.permits.close();
    }
}
