//! Connection state machine.
//!
//! Every connection attempt owns one [`StateMachine`]. It is born in
//! `Connecting`, may move to `Open` once, and ends in `Closed`, which is
//! terminal. Reopening builds a new attempt.

use std::{fmt, sync::OnceLock};

use tokio::sync::watch;

use crate::error::{EventSourceError, Result};

/// Ready state of a connection, as observed by callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Read loop active.
    Open,
    /// Terminal for this connection.
    Closed,
}

impl ConnectionState {
    /// Returns `true` while events may be dispatched.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` if the connection is in its terminal state.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Why a connection reached [`ConnectionState::Closed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// `close()` was called.
    Requested,
    /// Connect or handshake failed.
    HandshakeFailed,
    /// The server ended the stream.
    EndOfStream,
    /// The transport failed mid-stream.
    ReadError,
    /// A record grew past `max_record_bytes` without terminating.
    RecordTooLarge,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "close requested"),
            Self::HandshakeFailed => write!(f, "handshake failed"),
            Self::EndOfStream => write!(f, "end of stream"),
            Self::ReadError => write!(f, "read error"),
            Self::RecordTooLarge => write!(f, "record too large"),
        }
    }
}

/// Guarded state transitions for one connection attempt.
#[derive(Debug)]
pub(crate) struct StateMachine {
    tx: watch::Sender<ConnectionState>,
    reason: OnceLock<CloseReason>,
}

impl StateMachine {
    /// A fresh attempt, already in `Connecting`.
    pub(crate) fn connecting() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Connecting);
        Self {
            tx,
            reason: OnceLock::new(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// `Connecting → Open`. Any other starting state is rejected.
    pub(crate) fn open(&self) -> Result<()> {
        let opened = self.tx.send_if_modified(|state| {
            if *state != ConnectionState::Connecting {
                return false;
            }
            *state = ConnectionState::Open;
            true
        });

        if opened {
            Ok(())
        } else {
            Err(EventSourceError::InvalidState {
                from: self.state(),
                to: ConnectionState::Open,
            })
        }
    }

    /// Move to `Closed`. Returns `true` only for the call that performed the
    /// transition; the first reason recorded wins.
    pub(crate) fn close(&self, reason: CloseReason) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_closed() {
                return false;
            }
            let _ = self.reason.set(reason);
            *state = ConnectionState::Closed;
            true
        })
    }

    pub(crate) fn close_reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Wait until the attempt is closed and return why.
    pub(crate) async fn closed(&self) -> CloseReason {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(ConnectionState::is_closed).await;
        self.close_reason().unwrap_or(CloseReason::Requested)
    }
}
