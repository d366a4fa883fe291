//! HTTP handshake that opens an event stream.
//!
//! Sends a fixed `GET` request, reads until the header terminator and checks
//! the status line and content type. Body bytes that arrive together with the
//! headers are handed back so they can seed the frame buffer.

use bytes::{Buf, BytesMut};
use memchr::memmem;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::{
    error::{EventSourceError, Result},
    target::Target,
};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const EXPECTED_STATUS: &str = "200 ok";
const EXPECTED_CONTENT_TYPE: &str = "content-type: text/event-stream";

/// Outcome of a successful handshake.
#[derive(Debug)]
pub(crate) struct Handshake {
    pub(crate) status_line: String,
    /// Bytes read past the header terminator.
    pub(crate) residual: BytesMut,
}

/// Build the request sent to open the stream.
///
/// `Last-Event-ID` is only added when an ID is known.
pub(crate) fn build_request(target: &Target, last_event_id: Option<&str>) -> String {
    let mut request = format!(
        "GET {} HTTP/1.0\r\nAccept: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\n",
        target.request_target()
    );
    if let Some(id) = last_event_id {
        request.push_str("Last-Event-ID: ");
        request.push_str(id);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");
    request
}

/// Run the handshake over `io`.
///
/// # Errors
///
/// - [`EventSourceError::Read`] if writing the request or reading fails.
/// - [`EventSourceError::HandshakeIncomplete`] if the stream ends before the
///   header terminator.
/// - [`EventSourceError::UnexpectedResponse`] if the header is too large or
///   fails validation.
pub(crate) async fn perform<S>(
    io: &mut S,
    target: &Target,
    last_event_id: Option<&str>,
    max_header_bytes: usize,
    read_buffer_size: usize,
) -> Result<Handshake>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let request = build_request(target, last_event_id);
    io.write_all(request.as_bytes()).await?;
    io.flush().await?;
    debug!(
        request_target = target.request_target(),
        ?last_event_id,
        "SSE request sent"
    );

    let mut buffer = BytesMut::with_capacity(read_buffer_size);
    let mut searched = 0;

    loop {
        if let Some(pos) = memmem::find(&buffer[searched..], HEADER_TERMINATOR) {
            let head = buffer.split_to(searched + pos);
            buffer.advance(HEADER_TERMINATOR.len());
            let status_line = validate_head(&head)?;
            debug!(status = %status_line, residual = buffer.len(), "SSE response accepted");
            return Ok(Handshake {
                status_line,
                residual: buffer,
            });
        }

        if buffer.len() > max_header_bytes {
            return Err(EventSourceError::unexpected_response(
                status_line_of(&buffer),
                format!("response header exceeds {max_header_bytes} bytes"),
            ));
        }

        // The terminator may straddle two reads.
        searched = buffer.len().saturating_sub(HEADER_TERMINATOR.len() - 1);
        buffer.reserve(read_buffer_size);
        if io.read_buf(&mut buffer).await? == 0 {
            return Err(EventSourceError::HandshakeIncomplete {
                received: buffer.len(),
            });
        }
    }
}

fn status_line_of(head: &[u8]) -> String {
    let end = memchr::memchr(b'\n', head).unwrap_or(head.len());
    String::from_utf8_lossy(&head[..end]).trim().to_string()
}

/// Check the response head (everything before the terminator).
///
/// The status line must contain `200 ok` and one header line must equal
/// `content-type: text/event-stream`, both compared case-insensitively.
fn validate_head(head: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.lines();
    let status_line = lines.next().unwrap_or_default().trim().to_string();

    if !status_line.to_ascii_lowercase().contains(EXPECTED_STATUS) {
        return Err(EventSourceError::unexpected_response(
            status_line,
            "status is not 200 OK",
        ));
    }

    if !lines.any(|line| line.trim().eq_ignore_ascii_case(EXPECTED_CONTENT_TYPE)) {
        return Err(EventSourceError::unexpected_response(
            status_line,
            "missing content-type: text/event-stream",
        ));
    }

    Ok(status_line)
}
