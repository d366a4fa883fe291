//! Transport abstraction.
//!
//! The client only needs an ordered, bidirectional byte stream. A
//! [`Connector`] produces one per connection attempt; dropping it closes the
//! connection.

use std::io;

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tracing::debug;

/// Byte stream used by a single connection attempt.
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> TransportStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed transport stream.
pub type BoxedTransport = Box<dyn TransportStream>;

/// Opens transport streams.
///
/// Implement this to route connections through something other than plain
/// TCP (TLS, a proxy, an in-memory pipe in tests).
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `host:port`.
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedTransport>;
}

/// Plain TCP connector.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedTransport> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        debug!(host, port, peer = ?stream.peer_addr().ok(), "TCP connection established");
        Ok(Box::new(stream))
    }
}
