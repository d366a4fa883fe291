//! Record parser: turns one complete record into an [`Event`].
//!
//! Lines are split on any newline convention and trimmed; blank lines are
//! dropped. Field names are matched case-sensitively on the text before the
//! first colon. `id:` and `retry:` also update the [`ReconnectionPolicy`].

use core::time::Duration;

use bytes::BytesMut;
use bytes_utils::{Str, StrMut};
use tracing::debug;

use super::{event::Event, frame::Record};
use crate::policy::ReconnectionPolicy;

const COMMENT_PREFIX: char = ':';

/// Field names understood by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldName {
    Event,
    Data,
    Id,
    Retry,
    Ignored,
}

impl FieldName {
    fn from_name(name: &str) -> Self {
        match name {
            "event" => Self::Event,
            "data" => Self::Data,
            "id" => Self::Id,
            "retry" => Self::Retry,
            _ => Self::Ignored,
        }
    }
}

/// One trimmed, non-empty line of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordLine<'a> {
    /// Starts with `:`.
    Comment,
    /// `name: value`, with the value trimmed.
    Field { name: FieldName, value: &'a str },
    /// No colon at all.
    Unknown,
}

fn classify(line: &str) -> RecordLine<'_> {
    if line.starts_with(COMMENT_PREFIX) {
        return RecordLine::Comment;
    }
    match line.split_once(':') {
        Some((name, value)) => RecordLine::Field {
            name: FieldName::from_name(name),
            value: value.trim(),
        },
        None => RecordLine::Unknown,
    }
}

/// Field accumulator.
///
/// Most records carry a single line per field, so the first value stays an
/// immutable [`Str`] view into the record; a mutable buffer is only allocated
/// when a second line arrives.
#[derive(Debug, Default)]
enum FieldBuffer {
    #[default]
    Uninit,
    Immutable(Str),
    Mutable(StrMut),
}

impl FieldBuffer {
    fn push(&mut self, s: Str, separator: &str) {
        match self {
            Self::Uninit => *self = Self::Immutable(s),
            Self::Immutable(first) => {
                let len = first.len() + separator.len() + s.len();
                let inner = BytesMut::with_capacity(len);
                // Safety: the buffer is empty, so it holds no invalid bytes.
                let mut buf = unsafe { StrMut::from_inner_unchecked(inner) };
                buf.push_str(first);
                buf.push_str(separator);
                buf.push_str(&s);
                *self = Self::Mutable(buf);
            }
            Self::Mutable(buf) => {
                buf.push_str(separator);
                buf.push_str(&s);
            }
        }
    }

    fn freeze(self) -> Option<Str> {
        match self {
            Self::Uninit => None,
            Self::Immutable(s) => Some(s),
            Self::Mutable(s) => Some(s.freeze()),
        }
    }
}

#[derive(Debug, Default)]
struct EventBuilder {
    id: Option<Str>,
    event: FieldBuffer,
    data: FieldBuffer,
}

impl EventBuilder {
    fn build(self) -> Event {
        Event {
            id: self.id,
            event: self.event.freeze(),
            data: self.data.freeze(),
        }
    }
}

/// Parse one record.
///
/// Returns `None` when the record has no non-blank line. Otherwise returns an
/// [`Event`], which is empty when no `id`, `event` or `data` line was present
/// (for example a comment-only or `retry:`-only record).
///
/// The policy is updated as a side effect: `id:` sets (or, when empty,
/// clears) the last event ID even if the event is later discarded, and a
/// well-formed `retry:` replaces the retry interval. A malformed `retry:`
/// value is ignored.
pub fn parse_record(record: &Record, policy: &mut ReconnectionPolicy) -> Option<Event> {
    let mut lines = record
        .as_str()
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .peekable();

    lines.peek()?;

    let mut builder = EventBuilder::default();
    for line in lines {
        let RecordLine::Field { name, value } = classify(line) else {
            continue;
        };

        match name {
            FieldName::Id => {
                policy.set_last_event_id(value);
                builder.id = Some(record.slice(value));
            }
            FieldName::Event => builder.event.push(record.slice(value), ""),
            FieldName::Data => builder.data.push(record.slice(value), "\n"),
            FieldName::Retry => match value.parse::<u64>() {
                Ok(millis) => policy.set_retry_interval(Duration::from_millis(millis)),
                Err(_) => debug!(value, "ignoring malformed retry value"),
            },
            FieldName::Ignored => {}
        }
    }

    Some(builder.build())
}
