//! Parsed event value.

use core::fmt;

use bytes_utils::Str;

/// One event parsed from a record.
///
/// Each field is present only if at least one line of the record contributed
/// to it. Events are immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Event {
    /// Value of the last `id:` line.
    pub id: Option<Str>,
    /// Event type, the concatenation of every `event:` line.
    pub event: Option<Str>,
    /// Payload, every `data:` line joined with `\n`.
    pub data: Option<Str>,
}

impl Event {
    /// The event ID, if the record carried one.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The event type name, if the record carried one.
    pub fn event_type(&self) -> Option<&str> {
        self.event.as_deref()
    }

    /// The data payload, if the record carried one.
    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    /// Returns `true` if no field is present.
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.event.is_none() && self.data.is_none()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event(id={:?}, event={:?}, data={:?})",
            self.id(),
            self.event_type(),
            self.data()
        )
    }
}
