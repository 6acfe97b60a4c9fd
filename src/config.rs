//! Container configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`), each with a default that is used when
//! the variable is missing or unparsable.

use std::time::Duration;

/// Default bound on the close handshake.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default grace period granted to sessions during [`crate::Container::stop`].
pub const DEFAULT_STOP_GRACE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on the client upgrade round-trip.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Top-level container configuration.
///
/// Loaded via [`ContainerConfig::from_env`] or built from
/// [`ContainerConfig::default`] plus the `with_*` setters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    /// How long a session waits for the peer's Close frame before forcing
    /// local closure.
    pub close_timeout: Duration,

    /// How long `stop()` waits for sessions to close before force-closing
    /// the remainder.
    pub stop_grace_timeout: Duration,

    /// Upper bound on the client upgrade round-trip.
    pub connect_timeout: Duration,

    /// Capacity of each session's dispatch queue.
    pub dispatch_queue_capacity: usize,

    /// Capacity of each transport's inbound event queue.
    pub inbound_queue_capacity: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            stop_grace_timeout: DEFAULT_STOP_GRACE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            dispatch_queue_capacity: 64,
            inbound_queue_capacity: 64,
        }
    }
}

impl ContainerConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    /// Recognised keys: `WS_CLOSE_TIMEOUT_MS`, `WS_STOP_GRACE_TIMEOUT_MS`,
    /// `WS_CONNECT_TIMEOUT_MS`, `WS_DISPATCH_QUEUE_CAPACITY`,
    /// `WS_INBOUND_QUEUE_CAPACITY`.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            close_timeout: parse_env_millis("WS_CLOSE_TIMEOUT_MS", defaults.close_timeout),
            stop_grace_timeout: parse_env_millis(
                "WS_STOP_GRACE_TIMEOUT_MS",
                defaults.stop_grace_timeout,
            ),
            connect_timeout: parse_env_millis("WS_CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            dispatch_queue_capacity: parse_env(
                "WS_DISPATCH_QUEUE_CAPACITY",
                defaults.dispatch_queue_capacity,
            )
            .max(1),
            inbound_queue_capacity: parse_env(
                "WS_INBOUND_QUEUE_CAPACITY",
                defaults.inbound_queue_capacity,
            )
            .max(1),
        }
    }

    /// Sets the close handshake timeout.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Sets the stop grace timeout.
    #[must_use]
    pub const fn with_stop_grace_timeout(mut self, timeout: Duration) -> Self {
        self.stop_grace_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the dispatch queue capacity (at least 1).
    #[must_use]
    pub fn with_dispatch_queue_capacity(mut self, capacity: usize) -> Self {
        self.dispatch_queue_capacity = capacity.max(1);
        self
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable holding a millisecond count.
fn parse_env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
