//! Configuration of the response cache.
//!
//! | variable | meaning |
//! |----------|---------|
//! | `MICRO_CACHE_SWEEP_PERIOD_MS` | period of the sweep removing expired entries |

use std::env;
use std::time::Duration;

use once_cell::sync::Lazy;
use tracing::warn;

pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(60);
pub const DEFAULT_ENTRY_SIZE_THRESHOLD_DIVISOR: usize = 10;

const SWEEP_PERIOD_KEY: &str = "MICRO_CACHE_SWEEP_PERIOD_MS";

static ENV_CONFIG: Lazy<CacheConfig> = Lazy::new(CacheConfig::from_env);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    max_size_bytes: usize,
    entry_size_threshold_divisor: usize,
    sweep_period: Duration,
    shared: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 0,
            entry_size_threshold_divisor: DEFAULT_ENTRY_SIZE_THRESHOLD_DIVISOR,
            sweep_period: DEFAULT_SWEEP_PERIOD,
            shared: true,
        }
    }
}

impl CacheConfig {
    /// A shared cache of `max_size_kb` kilobytes, the sweep period read once
    /// from the environment.
    pub fn with_max_size_kb(max_size_kb: usize) -> Self {
        (*ENV_CONFIG).clone().with_max_size_bytes(max_size_kb * 1024)
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let config = Self::default();
        let Some(value) = lookup(SWEEP_PERIOD_KEY) else {
            return config;
        };

        match value.trim().parse::<u64>() {
            Ok(millis) if millis > 0 => config.with_sweep_period(Duration::from_millis(millis)),
            _ => {
                warn!(key = SWEEP_PERIOD_KEY, value = %value, "ignore invalid cache config value");
                config
            }
        }
    }

    pub fn with_max_size_bytes(mut self, max_size_bytes: usize) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    /// Entries larger than `max_size_bytes / divisor` are not cached.
    pub fn with_entry_size_threshold_divisor(mut self, divisor: usize) -> Self {
        self.entry_size_threshold_divisor = divisor.max(1);
        self
    }

    pub fn with_sweep_period(mut self, sweep_period: Duration) -> Self {
        self.sweep_period = sweep_period;
        self
    }

    pub fn with_shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    pub fn entry_size_threshold_divisor(&self) -> usize {
        self.entry_size_threshold_divisor
    }

    pub fn sweep_period(&self) -> Duration {
        self.sweep_period
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }
}
