use std::sync::Arc;
use std::time::Duration;

use super::AdapterConfig;
use super::StoreAdapter;
use crate::StoreBackend;

pub struct StoreAdapterBuilder {
    backend: Arc<dyn StoreBackend>,
    config: AdapterConfig,
}

impl StoreAdapterBuilder {
    /// Create a new builder with default config over the given backend
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            config: AdapterConfig::default(),
        }
    }

    /// Set connection timeout (default: 1s)
    pub fn connect_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set request timeout (default: 3s)
    pub fn request_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Cap concurrently in-flight backend requests (default: 100)
    pub fn max_in_flight(
        mut self,
        limit: usize,
    ) -> Self {
        self.config.max_in_flight = limit;
        self
    }

    /// Set the event channel capacity handed to watch consumers
    /// (default: 1)
    pub fn watch_buffer(
        mut self,
        capacity: usize,
    ) -> Self {
        self.config.watch_buffer = capacity;
        self
    }

    /// Set the base delay between contended lock acquisition attempts
    /// (default: 250ms)
    pub fn lock_retry_interval(
        mut self,
        interval: Duration,
    ) -> Self {
        self.config.lock_retry_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Completely replaces the default configuration
    ///
    /// # Warning: Configuration Override
    /// This will discard all previous settings configured through individual
    /// methods like [`connect_timeout`](StoreAdapterBuilder::connect_timeout)
    /// or [`max_in_flight`](StoreAdapterBuilder::max_in_flight).
    ///
    /// # Example: Full Configuration
    /// ```ignore
    /// use d_store::{AdapterConfig, StoreAdapter};
    ///
    /// let custom_config = AdapterConfig {
    ///     request_timeout_ms: 5000,
    ///     ..AdapterConfig::default()
    /// };
    ///
    /// let adapter = StoreAdapter::builder(backend)
    ///     .set_config(custom_config)
    ///     .build();
    /// ```
    pub fn set_config(
        mut self,
        config: AdapterConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Build the adapter with current configuration
    pub fn build(self) -> StoreAdapter {
        StoreAdapter::new(self.backend, self.config)
    }
}
