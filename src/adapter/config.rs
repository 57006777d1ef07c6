use std::env;
use std::time::Duration;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;

/// Tunables for a [`StoreAdapter`](crate::StoreAdapter).
///
/// Every field has a serde default, so a partially specified source fills
/// the rest from the table below.
#[derive(Debug, Deserialize, Clone)]
pub struct AdapterConfig {
    /// Maximum time to wait for the reachability probe on connect
    /// Default: 1 second
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Maximum time to wait for a single backend request
    /// Default: 3 seconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Cap on concurrently in-flight backend requests
    /// Default: 100
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Capacity of the event channel handed to each watch consumer
    /// Default: 1
    #[serde(default = "default_watch_buffer")]
    pub watch_buffer: usize,

    /// Base delay between lock acquisition attempts under contention;
    /// each retry adds random jitter on top
    /// Default: 250 milliseconds
    #[serde(default = "default_lock_retry_interval_ms")]
    pub lock_retry_interval_ms: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_in_flight: default_max_in_flight(),
            watch_buffer: default_watch_buffer(),
            lock_retry_interval_ms: default_lock_retry_interval_ms(),
        }
    }
}

impl AdapterConfig {
    /// Load configuration with priority:
    /// 1. Default values
    /// 2. Optional config file named by `DSTORE_CONFIG`
    /// 3. Environment variables prefixed `DSTORE__` (highest priority)
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let mut config = Config::builder();

        if let Ok(path) = env::var("DSTORE_CONFIG") {
            config = config.add_source(File::with_name(&path));
        }

        config = config.add_source(
            Environment::with_prefix("DSTORE")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        config.build()?.try_deserialize()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms)
    }
}

fn default_connect_timeout_ms() -> u64 {
    1000
}
fn default_request_timeout_ms() -> u64 {
    3000
}
fn default_max_in_flight() -> usize {
    100
}
fn default_watch_buffer() -> usize {
    1
}
fn default_lock_retry_interval_ms() -> u64 {
    250
}
