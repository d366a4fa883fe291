//! Event source configuration.

use std::time::Duration;

use crate::policy::DEFAULT_RETRY_INTERVAL;

/// Configuration for an [`EventSource`](crate::EventSource).
///
/// Provides sensible defaults and chainable setter methods.
#[derive(Clone, Debug)]
pub struct EventSourceConfig {
    /// Event stream URL. Parsed when the connection is opened.
    pub url: String,
    /// Upper bound for connect plus handshake.
    pub connect_timeout: Duration,
    /// Maximum wait for a single read once open (None = wait indefinitely).
    pub read_timeout: Option<Duration>,
    /// Initial reconnection interval, until the server sends `retry:`.
    pub retry_interval: Duration,
    /// Deliver events that carry no `id`, `event` or `data` field.
    pub dispatch_empty_events: bool,
    /// Largest response header accepted during the handshake.
    pub max_header_bytes: usize,
    /// Size of each transport read.
    pub read_buffer_size: usize,
    /// Largest unterminated record buffered before the connection is closed.
    pub max_record_bytes: usize,
    /// Maximum delay between reconnection attempts.
    pub reconnect_max_delay: Duration,
    /// Backoff multiplier for reconnection delays.
    pub reconnect_backoff_factor: f64,
    /// Random jitter factor (0.0–1.0) for reconnection delays.
    pub reconnect_jitter: f64,
    /// Maximum number of consecutive reconnection attempts (None = infinite).
    pub reconnect_max_attempts: Option<u32>,
}

impl Default for EventSourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: None,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            dispatch_empty_events: false,
            max_header_bytes: 16 * 1024,
            read_buffer_size: 8 * 1024,
            max_record_bytes: 1024 * 1024,
            reconnect_max_delay: Duration::from_secs(60),
            reconnect_backoff_factor: 2.0,
            reconnect_jitter: 0.1,
            reconnect_max_attempts: None,
        }
    }
}

impl EventSourceConfig {
    /// Create a new configuration with the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the connect and handshake timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-read timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the initial retry interval.
    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set whether empty events are delivered.
    #[must_use]
    pub fn dispatch_empty_events(mut self, dispatch: bool) -> Self {
        self.dispatch_empty_events = dispatch;
        self
    }

    /// Set the maximum response header size.
    #[must_use]
    pub fn max_header_bytes(mut self, bytes: usize) -> Self {
        self.max_header_bytes = bytes;
        self
    }

    /// Set the read buffer size.
    #[must_use]
    pub fn read_buffer_size(mut self, bytes: usize) -> Self {
        self.read_buffer_size = bytes;
        self
    }

    /// Set the maximum size of a single record.
    #[must_use]
    pub fn max_record_bytes(mut self, bytes: usize) -> Self {
        self.max_record_bytes = bytes;
        self
    }

    /// Set the maximum reconnection delay.
    #[must_use]
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    /// Set the reconnection backoff factor.
    #[must_use]
    pub fn reconnect_backoff_factor(mut self, factor: f64) -> Self {
        self.reconnect_backoff_factor = factor;
        self
    }

    /// Set the reconnection jitter factor.
    #[must_use]
    pub fn reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = jitter;
        self
    }

    /// Set the maximum reconnection attempts.
    #[must_use]
    pub fn reconnect_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.reconnect_max_attempts = attempts;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        if self.read_timeout.is_some_and(|t| t.is_zero()) {
            return Err("Read timeout must be > 0".to_string());
        }
        if self.max_header_bytes == 0 {
            return Err("Max header bytes must be > 0".to_string());
        }
        if self.read_buffer_size == 0 {
            return Err("Read buffer size must be > 0".to_string());
        }
        if self.max_record_bytes == 0 {
            return Err("Max record bytes must be > 0".to_string());
        }
        if self.reconnect_max_delay < self.retry_interval {
            return Err("Max reconnect delay must be >= retry interval".to_string());
        }
        if self.reconnect_backoff_factor < 1.0 || !self.reconnect_backoff_factor.is_finite() {
            return Err("Backoff factor must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.reconnect_jitter) {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }
}
