//! Event handler trait and the stock handlers.
//!
//! The read loop calls a handler for every dispatched event, one at a time
//! and in stream order. Handlers run on the read loop task, so a slow handler
//! delays the events behind it.

use std::{
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures_core::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{error::EventSourceError, parse::Event, state::CloseReason};

/// Receives events and lifecycle notifications from an
/// [`EventSource`](crate::EventSource).
pub trait EventHandler: Send + Sync + 'static {
    /// Called for every dispatched event.
    fn on_event(&self, event: Event);

    /// Called for errors raised after the connection is open, and for failed
    /// attempts under [`EventSource::run`](crate::EventSource::run).
    ///
    /// Default implementation does nothing.
    fn on_error(&self, _error: EventSourceError) {}

    /// Called once the handshake succeeded, before the first event.
    ///
    /// Default implementation does nothing.
    fn on_open(&self) {}

    /// Called once when an open connection reaches `Closed`.
    ///
    /// Default implementation does nothing.
    fn on_close(&self, _reason: CloseReason) {}

    /// Called when no further callbacks will follow: after
    /// [`on_close`](Self::on_close) for a connection opened with
    /// [`open`](crate::EventSource::open), or when
    /// [`run`](crate::EventSource::run) returns.
    ///
    /// Default implementation does nothing.
    fn on_finish(&self) {}
}

impl<H: EventHandler> EventHandler for Arc<H> {
    fn on_event(&self, event: Event) {
        (**self).on_event(event);
    }

    fn on_error(&self, error: EventSourceError) {
        (**self).on_error(error);
    }

    fn on_open(&self) {
        (**self).on_open();
    }

    fn on_close(&self, reason: CloseReason) {
        (**self).on_close(reason);
    }

    fn on_finish(&self) {
        (**self).on_finish();
    }
}

type MessageCallback = Box<dyn Fn(Event) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(EventSourceError) + Send + Sync>;

/// Handler built from closures.
///
/// ```
/// use hpx_eventsource::FnHandler;
///
/// let handler = FnHandler::new()
///     .on_message(|event| println!("{event}"))
///     .on_error(|err| eprintln!("stream error: {err}"));
/// # let _ = handler;
/// ```
#[derive(Default)]
pub struct FnHandler {
    message: Option<MessageCallback>,
    error: Option<ErrorCallback>,
}

impl FnHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the message callback, replacing any previous one.
    #[must_use]
    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.message = Some(Box::new(callback));
        self
    }

    /// Register the error callback, replacing any previous one.
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(EventSourceError) + Send + Sync + 'static,
    {
        self.error = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler")
            .field("message", &self.message.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

impl EventHandler for FnHandler {
    fn on_event(&self, event: Event) {
        if let Some(callback) = &self.message {
            callback(event);
        }
    }

    fn on_error(&self, error: EventSourceError) {
        if let Some(callback) = &self.error {
            callback(error);
        }
    }
}

type EventSender = mpsc::UnboundedSender<Result<Event, EventSourceError>>;

/// Handler that forwards events and errors into an [`EventReceiver`].
///
/// The channel is unbounded so the read loop never blocks on a slow
/// consumer. Items sent after the receiver is dropped are discarded.
///
/// One handler feeds one connection opened with
/// [`open`](crate::EventSource::open), or one
/// [`run`](crate::EventSource::run) supervision. The receiver ends when
/// that finishes.
#[derive(Clone, Debug)]
pub struct ChannelHandler {
    tx: Arc<Mutex<Option<EventSender>>>,
}

impl ChannelHandler {
    /// Create a handler and the receiving half.
    pub fn new() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            EventReceiver { rx },
        )
    }

    fn send(&self, item: Result<Event, EventSourceError>) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(item);
        }
    }
}

impl EventHandler for ChannelHandler {
    fn on_event(&self, event: Event) {
        self.send(Ok(event));
    }

    fn on_error(&self, error: EventSourceError) {
        warn!(error = %error, "SSE stream error");
        self.send(Err(error));
    }

    fn on_finish(&self) {
        self.tx.lock().take();
    }
}

/// Stream of events and errors fed by a [`ChannelHandler`].
///
/// Errors do not end the stream. It ends once the connection or the
/// supervision feeding it has finished, or every clone of the handler has
/// been dropped.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Result<Event, EventSourceError>>,
}

impl EventReceiver {
    /// Receive the next item, waiting until one is available.
    pub async fn next_event(&mut self) -> Option<Result<Event, EventSourceError>> {
        self.rx.recv().await
    }
}

impl Stream for EventReceiver {
    type Item = Result<Event, EventSourceError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.rx.poll_recv(cx)
    }
}
