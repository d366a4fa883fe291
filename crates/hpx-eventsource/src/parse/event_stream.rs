//! [`Stream`] that decodes a stream of byte chunks into [`Event`]s.

use core::{
    fmt,
    pin::Pin,
    str::Utf8Error,
    task::{Context, Poll, ready},
};

use futures_core::Stream;

use super::{event::Event, frame::FrameBuffer, record::parse_record};
use crate::policy::ReconnectionPolicy;

/// Error yielded by [`EventStream`].
///
/// Neither variant ends the stream: polling again continues with the next
/// chunk or record.
#[derive(Debug, PartialEq)]
pub enum EventStreamError<E> {
    /// The underlying chunk stream failed.
    Transport(E),
    /// A record was not valid UTF-8 and was dropped.
    InvalidUtf8(Utf8Error),
}

impl<E: fmt::Display> fmt::Display for EventStreamError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "event stream transport error: {e}"),
            Self::InvalidUtf8(e) => write!(f, "invalid UTF-8 in event record: {e}"),
        }
    }
}

impl<E> core::error::Error for EventStreamError<E>
where
    E: core::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::InvalidUtf8(e) => Some(e),
        }
    }
}

pin_project_lite::pin_project! {
    /// A [`Stream`] that converts a stream of byte chunks into parsed
    /// [`Event`]s, using the same framing and parsing rules as
    /// [`EventSource`](crate::EventSource).
    ///
    /// Empty events are not yielded. The [`ReconnectionPolicy`] updated by
    /// `id:` and `retry:` lines is available through [`EventStream::policy`].
    #[project = EventStreamProjection]
    #[derive(Debug)]
    pub struct EventStream<S> {
        #[pin]
        stream: S,
        frames: FrameBuffer,
        policy: ReconnectionPolicy,
        terminated: bool,
    }
}

impl<S> EventStream<S> {
    /// Create a new [`EventStream`] from an underlying byte stream.
    pub fn new(stream: S) -> Self {
        Self::with_policy(stream, ReconnectionPolicy::default())
    }

    /// Create a stream that continues from an existing policy, e.g. after a
    /// reconnect.
    pub fn with_policy(stream: S, policy: ReconnectionPolicy) -> Self {
        Self {
            stream,
            frames: FrameBuffer::new(),
            policy,
            terminated: false,
        }
    }

    /// Reconnection state accumulated so far.
    pub fn policy(&self) -> &ReconnectionPolicy {
        &self.policy
    }

    /// The last event ID seen on this stream.
    pub fn last_event_id(&self) -> Option<&str> {
        self.policy.last_event_id()
    }

    /// Consume the stream, returning whatever was buffered but not emitted.
    pub fn into_pending(self) -> Vec<u8> {
        self.frames.pending().to_vec()
    }
}

impl<S, E, B> Stream for EventStream<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    type Item = Result<Event, EventStreamError<E>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            while let Some(record) = this.frames.next_record() {
                match record {
                    Ok(record) => {
                        if let Some(event) = parse_record(&record, this.policy)
                            && !event.is_empty()
                        {
                            return Poll::Ready(Some(Ok(event)));
                        }
                    }
                    Err(e) => return Poll::Ready(Some(Err(EventStreamError::InvalidUtf8(e)))),
                }
            }

            if *this.terminated {
                return Poll::Ready(None);
            }

            match ready!(this.stream.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => this.frames.extend(chunk.as_ref()),
                Some(Err(e)) => return Poll::Ready(Some(Err(EventStreamError::Transport(e)))),
                None => {
                    *this.terminated = true;
                    this.frames.finish();
                }
            }
        }
    }
}
