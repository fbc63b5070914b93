use std::time::Duration;

use utils::env::{overlay, overlay_string};

/// Configuration for one `Pool`. Defaults match what the thread/subprocess
/// backends need (30s create timeout, 5s shutdown timeout); the container
/// and pod provider crates expose their own constructors with the wider
/// timeouts those backends need.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Hard upper bound on the number of live instances.
    pub max_pool_size: usize,
    /// Reaper tick period and idleness threshold.
    pub idle_interval: Duration,
    /// Budget for a single `create` call before it is considered timed out.
    pub create_timeout: Duration,
    /// Per-instance budget for graceful termination before forceTerminate.
    pub shutdown_timeout: Duration,
    /// Prefix used when synthesizing instance names (`<prefix>-<port>-<ts>`).
    pub name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 3,
            idle_interval: Duration::from_secs(10),
            create_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
            name_prefix: "pool".to_string(),
        }
    }
}

impl PoolConfig {
    /// Overlay environment-variable overrides onto `Self::default()`.
    /// Malformed values fall back to the default and are logged at `warn`
    /// (see `utils::env::overlay`); this never fails construction.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_pool_size: overlay("POOL_MAX_SIZE", default.max_pool_size),
            idle_interval: Duration::from_millis(overlay(
                "POOL_IDLE_INTERVAL_MS",
                default.idle_interval.as_millis() as u64,
            )),
            create_timeout: Duration::from_millis(overlay(
                "POOL_CREATE_TIMEOUT_MS",
                default.create_timeout.as_millis() as u64,
            )),
            shutdown_timeout: Duration::from_millis(overlay(
                "POOL_SHUTDOWN_TIMEOUT_MS",
                default.shutdown_timeout.as_millis() as u64,
            )),
            name_prefix: overlay_string("POOL_NAME_PREFIX", default.name_prefix),
        }
    }

    pub fn with_max_pool_size(mut self, max_pool_size: usize) -> Self {
        self.max_pool_size = max_pool_size;
        self
    }

    pub fn with_idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    pub fn with_create_timeout(mut self, create_timeout: Duration) -> Self {
        self.create_timeout = create_timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn with_name_prefix(mut self, name_prefix: impl Into<String>) -> Self {
        self.name_prefix = name_prefix.into();
        self
    }
}
