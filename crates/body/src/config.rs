//! Process-wide defaults for body sources and sinks.
//!
//! The defaults can be overridden through environment variables, which are
//! read once on first access of [`BodyConfig::global`]:
//!
//! | variable | meaning |
//! |----------|---------|
//! | `MICRO_BODY_SEND_TIMEOUT_MS` | send timeout of synchronous flushes |
//! | `MICRO_BODY_RECEIVE_TIMEOUT_MS` | receive timeout of body sources |
//! | `MICRO_BODY_AUTOSUSPEND_THRESHOLD` | pending bytes before a forwarded source is suspended, `0` disables |
//! | `MICRO_BODY_SUPPRESS_SYNC_FLUSH_WARNING` | `true` to silence the sync flush on dispatcher warning |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::Lazy;
use tracing::warn;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_AUTOSUSPEND_THRESHOLD: usize = 32768;

const SEND_TIMEOUT_KEY: &str = "MICRO_BODY_SEND_TIMEOUT_MS";
const RECEIVE_TIMEOUT_KEY: &str = "MICRO_BODY_RECEIVE_TIMEOUT_MS";
const AUTOSUSPEND_THRESHOLD_KEY: &str = "MICRO_BODY_AUTOSUSPEND_THRESHOLD";
const SUPPRESS_SYNC_FLUSH_WARNING_KEY: &str = "MICRO_BODY_SUPPRESS_SYNC_FLUSH_WARNING";

static GLOBAL_CONFIG: Lazy<BodyConfig> = Lazy::new(BodyConfig::from_env);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyConfig {
    send_timeout: Duration,
    receive_timeout: Option<Duration>,
    autosuspend_threshold: usize,
    suppress_sync_flush_warning: bool,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            send_timeout: DEFAULT_SEND_TIMEOUT,
            receive_timeout: None,
            autosuspend_threshold: DEFAULT_AUTOSUSPEND_THRESHOLD,
            suppress_sync_flush_warning: false,
        }
    }
}

impl BodyConfig {
    /// The process-wide configuration.
    pub fn global() -> &'static BodyConfig {
        &GLOBAL_CONFIG
    }

    /// Defaults overridden by the `MICRO_BODY_*` environment variables.
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let mut config = Self::default();
        if let Some(millis) = parse::<u64, _>(&lookup, SEND_TIMEOUT_KEY) {
            config = config.with_send_timeout(Duration::from_millis(millis));
        }
        if let Some(millis) = parse::<u64, _>(&lookup, RECEIVE_TIMEOUT_KEY) {
            config = config.with_receive_timeout(Some(Duration::from_millis(millis)));
        }
        if let Some(threshold) = parse::<usize, _>(&lookup, AUTOSUSPEND_THRESHOLD_KEY) {
            config = config.with_autosuspend_threshold(threshold);
        }
        if let Some(suppress) = parse::<bool, _>(&lookup, SUPPRESS_SYNC_FLUSH_WARNING_KEY) {
            config = config.with_suppress_sync_flush_warning(suppress);
        }
        config
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn with_receive_timeout(mut self, receive_timeout: Option<Duration>) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }

    /// A threshold of `0` disables auto suspend.
    pub fn with_autosuspend_threshold(mut self, threshold: usize) -> Self {
        self.autosuspend_threshold = if threshold == 0 { usize::MAX } else { threshold };
        self
    }

    pub fn with_suppress_sync_flush_warning(mut self, suppress: bool) -> Self {
        self.suppress_sync_flush_warning = suppress;
        self
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout
    }

    pub fn autosuspend_threshold(&self) -> usize {
        self.autosuspend_threshold
    }

    #[inline]
    pub fn is_autosuspend_enabled(&self) -> bool {
        self.autosuspend_threshold != usize::MAX
    }

    pub fn suppress_sync_flush_warning(&self) -> bool {
        self.suppress_sync_flush_warning
    }
}

fn parse<T: FromStr, F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Option<T> {
    let value = lookup(key)?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value = %value, "ignore invalid body config value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = BodyConfig::default();
        assert_eq!(config.send_timeout(), Duration::from_secs(60));
        assert_eq!(config.receive_timeout(), None);
        assert_eq!(config.autosuspend_threshold(), 32768);
        assert!(config.is_autosuspend_enabled());
        assert!(!config.suppress_sync_flush_warning());
    }

    #[test]
    fn zero_threshold_disables_autosuspend() {
        let config = BodyConfig::default().with_autosuspend_threshold(0);
        assert_eq!(config.autosuspend_threshold(), usize::MAX);
        assert!(!config.is_autosuspend_enabled());
    }

    #[test]
    fn reads_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (SEND_TIMEOUT_KEY, "1500"),
            (RECEIVE_TIMEOUT_KEY, "250"),
            (AUTOSUSPEND_THRESHOLD_KEY, "not a number"),
            (SUPPRESS_SYNC_FLUSH_WARNING_KEY, "true"),
        ]);
        let config = BodyConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.send_timeout(), Duration::from_millis(1500));
        assert_eq!(config.receive_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.autosuspend_threshold(), DEFAULT_AUTOSUSPEND_THRESHOLD);
        assert!(config.suppress_sync_flush_warning());
    }
}
