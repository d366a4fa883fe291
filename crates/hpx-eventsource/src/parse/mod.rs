//! Stream framing and event parsing.
//!
//! [`FrameBuffer`] reassembles blank-line delimited records from arbitrarily
//! chunked reads, [`parse_record`] turns a record into an [`Event`], and
//! [`EventStream`] combines both over any `Stream` of byte chunks.

pub mod event;
pub mod event_stream;
pub mod frame;
pub mod record;

pub use event::Event;
pub use event_stream::{EventStream, EventStreamError};
pub use frame::{FrameBuffer, Record, Records};
pub use record::parse_record;
