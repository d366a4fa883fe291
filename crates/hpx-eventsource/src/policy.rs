//! Reconnection state carried across connection attempts.

use std::{sync::Arc, time::Duration};

use parking_lot::RwLock;

/// Default reconnection interval before the server sends `retry:`.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Last event ID and retry interval of a client.
///
/// Owned by the client, not by a connection: both values survive reconnects.
/// Only the record parser updates them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectionPolicy {
    last_event_id: Option<String>,
    retry_interval: Duration,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_INTERVAL)
    }
}

impl ReconnectionPolicy {
    /// Create a policy with the given initial retry interval.
    pub fn new(retry_interval: Duration) -> Self {
        Self {
            last_event_id: None,
            retry_interval,
        }
    }

    /// The ID of the most recent `id:` line, if any.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Delay a reconnect strategy should wait before the next attempt.
    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// An empty ID clears the stored one.
    pub(crate) fn set_last_event_id(&mut self, id: &str) {
        if id.is_empty() {
            self.last_event_id = None;
        } else {
            self.last_event_id = Some(id.to_string());
        }
    }

    pub(crate) fn set_retry_interval(&mut self, interval: Duration) {
        self.retry_interval = interval;
    }
}

/// Policy shared between the read loop (writer) and observers (readers).
pub(crate) type SharedPolicy = Arc<RwLock<ReconnectionPolicy>>;
