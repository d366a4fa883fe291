//! Record framing over an arbitrarily chunked byte stream.
//!
//! A record is the block of lines that precedes a blank line. [`FrameBuffer`]
//! accepts chunks of any size, yields complete records in stream order and
//! keeps the unterminated tail for the next read. LF, CRLF and lone CR are all
//! accepted as line terminators, so both `\n\n` and `\r\n\r\n` close a record.

use core::str::Utf8Error;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_utils::Str;

const LF: u8 = b'\n';
const CR: u8 = b'\r';
/// UTF-8 byte order mark, skipped once at the start of a stream.
const BOM: &[u8] = b"\xEF\xBB\xBF";

/// One complete record, validated as UTF-8.
///
/// The terminating blank line and the line break before it are not part of
/// the record text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    bytes: Bytes,
}

impl Record {
    /// Validate `bytes` as UTF-8 and wrap them as a record.
    pub fn new(bytes: Bytes) -> Result<Self, Utf8Error> {
        core::str::from_utf8(&bytes)?;
        Ok(Self { bytes })
    }

    /// The record text.
    pub fn as_str(&self) -> &str {
        // Safety: the bytes were validated in `Record::new` and are immutable.
        unsafe { core::str::from_utf8_unchecked(&self.bytes) }
    }

    /// Zero-copy [`Str`] for `sub`, which must borrow from [`Record::as_str`].
    pub(crate) fn slice(&self, sub: &str) -> Str {
        // Safety: `sub` is a subslice of validated UTF-8 cut on char
        // boundaries, so the referenced bytes are valid UTF-8 as well.
        unsafe { Str::from_inner_unchecked(self.bytes.slice_ref(sub.as_bytes())) }
    }

    /// Length of the record text in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` for a record made of a lone blank line.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Accumulator that reassembles records from streamed chunks.
///
/// Owned by exactly one reader; nothing else mutates it.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: BytesMut,
    /// Start of the first line whose terminator has not been seen yet.
    line_start: usize,
    /// End of the last non-blank line of the record being assembled.
    record_end: usize,
    /// Set once the leading BOM (if any) has been handled.
    started: bool,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer seeded with bytes that were already received, such as
    /// the body bytes that arrived together with the response headers.
    pub fn with_initial(bytes: &[u8]) -> Self {
        let mut frames = Self::new();
        frames.extend(bytes);
        frames
    }

    /// Append a newly read chunk. Empty chunks are a no-op.
    pub fn extend(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Take the next complete record, if the buffer holds one.
    ///
    /// A record with invalid UTF-8 is consumed and returned as an error; the
    /// following records are unaffected.
    pub fn next_record(&mut self) -> Option<Result<Record, Utf8Error>> {
        if !self.skip_bom() {
            return None;
        }

        loop {
            let (line_end, rem_start) = find_eol(&self.buffer[self.line_start..])?;

            if line_end == 0 {
                let consumed = self.buffer.split_to(self.line_start + rem_start).freeze();
                let record = consumed.slice(..self.record_end);
                self.line_start = 0;
                self.record_end = 0;
                return Some(Record::new(record));
            }

            self.record_end = self.line_start + line_end;
            self.line_start += rem_start;
        }
    }

    /// Iterate over every complete record currently buffered.
    pub fn records(&mut self) -> Records<'_> {
        Records { frames: self }
    }

    /// Mark the end of the stream.
    ///
    /// A trailing CR can no longer be the first half of a CRLF pair, so it
    /// terminates its line. Whatever stays unterminated afterwards is an
    /// incomplete record and is never emitted.
    pub fn finish(&mut self) {
        self.started = true;
        if self.buffer.last() == Some(&CR) {
            self.buffer.put_u8(LF);
        }
    }

    /// Bytes buffered but not yet emitted as part of a record.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of buffered bytes not yet emitted.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn skip_bom(&mut self) -> bool {
        if self.started {
            return true;
        }
        match starts_with_bom(&self.buffer) {
            Some(true) => {
                self.buffer.advance(BOM.len());
                self.started = true;
                true
            }
            Some(false) => {
                self.started = true;
                true
            }
            None => false,
        }
    }
}

/// Iterator returned by [`FrameBuffer::records`].
#[derive(Debug)]
pub struct Records<'a> {
    frames: &'a mut FrameBuffer,
}

impl Iterator for Records<'_> {
    type Item = Result<Record, Utf8Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.frames.next_record()
    }
}

/// `Some(true)` if `buf` starts with a BOM, `Some(false)` if it cannot, and
/// `None` while too few bytes are buffered to tell.
fn starts_with_bom(buf: &[u8]) -> Option<bool> {
    let n = buf.len().min(BOM.len());
    if buf[..n] != BOM[..n] {
        Some(false)
    } else if n == BOM.len() {
        Some(true)
    } else {
        None
    }
}

/// Finds the next end-of-line in `bytes`.
///
/// Returns `(line_end, remainder_start)`: the non-inclusive end of the line
/// and the inclusive start of the remainder. Returns `None` if more data is
/// needed, including when the buffer ends with a CR that may start a CRLF.
fn find_eol(bytes: &[u8]) -> Option<(usize, usize)> {
    let first_match = memchr::memchr2(CR, LF, bytes)?;

    match bytes[first_match] {
        LF => Some((first_match, first_match + 1)),
        _ => {
            let next = bytes.get(first_match + 1)?;
            if *next == LF {
                Some((first_match, first_match + 2))
            } else {
                Some((first_match, first_match + 1))
            }
        }
    }
}
