//! Reconnect supervision layered on top of `open()`.
//!
//! The core client never reconnects by itself. [`EventSource::run`] reopens
//! fresh attempts with exponential backoff seeded by the policy's retry
//! interval until the client is closed.

use std::{sync::atomic::Ordering, time::Duration};

use rand::RngExt;
use tracing::{error, info, warn};

use crate::{
    client::EventSource,
    error::{EventSourceError, Result},
    handler::EventHandler,
    state::CloseReason,
};

/// Backoff parameters for one reconnect delay.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BackoffConfig {
    pub(crate) initial_delay: Duration,
    pub(crate) max_delay: Duration,
    pub(crate) factor: f64,
    pub(crate) jitter: f64,
}

/// Delay before reconnect attempt number `attempt` (0-based).
pub(crate) fn calculate_backoff(config: BackoffConfig, attempt: u32) -> Duration {
    let initial = config.initial_delay.as_secs_f64();
    let max = config.max_delay.as_secs_f64();
    let exponent = config.factor.powf(f64::from(attempt));
    let base = (initial * exponent).min(max);

    if config.jitter == 0.0 || base == 0.0 {
        return Duration::from_secs_f64(base);
    }

    let mut rng = rand::rng();
    let randomized = rng.random_range(0.0..=base);
    let blended = base * (1.0 - config.jitter) + randomized * config.jitter;
    Duration::from_secs_f64(blended)
}

impl<H: EventHandler> EventSource<H> {
    /// Keep the event source connected until [`close`](Self::close) is
    /// called.
    ///
    /// Opens a connection, waits for it to close and, unless the close was
    /// requested, reopens a fresh attempt after a backoff delay. The delay
    /// starts at the current retry interval (which the server may change with
    /// `retry:`) and grows by `reconnect_backoff_factor` per consecutive
    /// failure, capped by `reconnect_max_delay`. A server retry interval above
    /// the cap is honored as is. The `Last-Event-ID` of each attempt is the
    /// last ID seen on any previous one.
    ///
    /// Handshake failures are reported to [`EventHandler::on_error`] before
    /// the next attempt. Each connection's `on_close` is delivered before the
    /// next attempt starts, and [`EventHandler::on_finish`] is called once
    /// when this returns.
    ///
    /// # Errors
    ///
    /// - Fatal errors from [`open`](Self::open) (invalid URL, invalid state)
    ///   are returned immediately.
    /// - [`EventSourceError::ReconnectExhausted`] once
    ///   `reconnect_max_attempts` consecutive attempts have failed.
    pub async fn run(&self) -> Result<()> {
        self.shared.supervised.store(true, Ordering::Release);
        let result = self.supervise().await;
        self.shared.join_read_loop().await;
        self.shared.supervised.store(false, Ordering::Release);
        self.handler.on_finish();
        result
    }

    async fn supervise(&self) -> Result<()> {
        self.shared.stop.send_replace(false);
        let mut stop = self.shared.stop.subscribe();
        let mut attempt: u32 = 0;

        loop {
            if *stop.borrow() {
                info!(url = %self.config.url, "SSE supervision stopped");
                return Ok(());
            }

            info!(url = %self.config.url, attempt, "SSE connecting (supervised)");
            match self.open().await {
                Ok(()) => {
                    if *stop.borrow() {
                        self.close();
                        info!(url = %self.config.url, "SSE supervision stopped");
                        return Ok(());
                    }
                    attempt = 0;
                    let reason = self.closed().await;
                    self.shared.join_read_loop().await;
                    if reason == Some(CloseReason::Requested) || *stop.borrow() {
                        info!(url = %self.config.url, "SSE supervision stopped");
                        return Ok(());
                    }
                    warn!(url = %self.config.url, ?reason, "SSE connection lost");
                }
                Err(err) if err.is_fatal() => {
                    error!(url = %self.config.url, error = %err, "SSE connection failed permanently");
                    return Err(err);
                }
                Err(err) => {
                    if *stop.borrow() {
                        info!(url = %self.config.url, "SSE supervision stopped");
                        return Ok(());
                    }
                    warn!(url = %self.config.url, error = %err, attempt, "SSE connection attempt failed");
                    self.handler.on_error(err);
                }
            }

            if let Some(max) = self.config.reconnect_max_attempts
                && attempt >= max
            {
                error!(attempts = max, "Max SSE reconnect attempts exceeded");
                return Err(EventSourceError::ReconnectExhausted { attempts: max });
            }

            let delay = calculate_backoff(self.backoff_config(), attempt);
            attempt = attempt.saturating_add(1);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "SSE reconnecting after backoff"
            );

            tokio::select! {
                biased;

                _ = stop.wait_for(|stopped| *stopped) => {
                    info!(url = %self.config.url, "SSE supervision stopped during backoff");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn backoff_config(&self) -> BackoffConfig {
        let retry_interval = self.retry_interval();
        BackoffConfig {
            initial_delay: retry_interval,
            max_delay: self.config.reconnect_max_delay.max(retry_interval),
            factor: self.config.reconnect_backoff_factor,
            jitter: self.config.reconnect_jitter,
        }
    }
}
