//! Error handling for the event source client.

use std::{str::Utf8Error, time::Duration};

use thiserror::Error;

use crate::state::ConnectionState;

/// The main result type used throughout the crate.
pub type Result<T> = std::result::Result<T, EventSourceError>;

/// Errors raised while opening or running an event source.
///
/// Failures before the connection is open are returned from
/// [`EventSource::open`](crate::EventSource::open). Failures after that are
/// only reported through [`EventHandler::on_error`](crate::EventHandler::on_error).
#[derive(Error, Debug)]
pub enum EventSourceError {
    /// The URL could not be parsed or lacks a host or port.
    #[error("Invalid URL: {message}")]
    InvalidUrl { message: String },

    /// The transport could not reach the server.
    #[error("Failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The response ended before the header terminator arrived.
    #[error("Handshake incomplete: stream ended after {received} bytes")]
    HandshakeIncomplete { received: usize },

    /// The response failed status or content-type validation.
    #[error("Unexpected response ({status_line}): {message}")]
    UnexpectedResponse {
        status_line: String,
        message: String,
    },

    /// The transport failed while reading or writing.
    #[error("Read error: {0}")]
    Read(#[from] std::io::Error),

    /// A record contained invalid UTF-8.
    #[error("Invalid UTF-8 in event stream: {0}")]
    InvalidUtf8(#[from] Utf8Error),

    /// A record grew past the configured limit without terminating.
    #[error("Event record exceeds {limit} bytes")]
    RecordTooLarge { limit: usize },

    /// An operation exceeded its configured timeout.
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// An operation is not legal in the current connection state.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// The connection was closed while the operation was in progress.
    #[error("Connection closed")]
    Closed,

    /// The reconnect supervisor gave up.
    #[error("Gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },
}

impl EventSourceError {
    /// Create an invalid URL error.
    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an unexpected response error.
    pub fn unexpected_response(status_line: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            status_line: status_line.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Returns `true` if retrying cannot succeed without a change by the
    /// caller (bad URL, bad configuration, illegal state).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl { .. } | Self::Config { .. } | Self::InvalidState { .. }
        )
    }
}
