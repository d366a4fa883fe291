//! # hpx-eventsource
//!
//! Asynchronous Server-Sent Events client.
//!
//! Opens a long-lived HTTP connection, splits the response body into
//! blank-line delimited records, parses their fields and hands the resulting
//! events to a handler, in order, while the connection stays open.
//!
//! ## Features
//!
//! - **Chunk-independent framing**: records are reassembled regardless of how
//!   the transport splits the stream
//! - **Explicit lifecycle**: `Connecting → Open → Closed` with guarded
//!   transitions and a close that is safe from any task or handler
//! - **Reconnection state**: last event ID and server-provided retry interval
//!   survive across attempts, with an optional backoff supervisor
//! - **Pluggable transport**: plain TCP by default, any async byte stream via
//!   [`Connector`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hpx_eventsource::{EventSource, EventSourceConfig, FnHandler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handler = FnHandler::new()
//!         .on_message(|event| println!("{:?}: {:?}", event.event_type(), event.data()))
//!         .on_error(|err| eprintln!("stream error: {err}"));
//!
//!     let source = EventSource::new(EventSourceConfig::new("http://localhost:8080/events"), handler)?;
//!     source.open().await?;
//!     source.closed().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
mod handshake;
pub mod parse;
pub mod policy;
pub mod reconnect;
pub mod state;
pub mod target;
pub mod transport;

// Re-export commonly used types
pub use client::{EventSource, EventSourceHandle};
pub use config::EventSourceConfig;
pub use error::{EventSourceError, Result};
pub use handler::{ChannelHandler, EventHandler, EventReceiver, FnHandler};
pub use parse::{Event, EventStream, EventStreamError, FrameBuffer, Record, parse_record};
pub use policy::{DEFAULT_RETRY_INTERVAL, ReconnectionPolicy};
pub use state::{CloseReason, ConnectionState};
pub use target::Target;
pub use transport::{BoxedTransport, Connector, TcpConnector, TransportStream};
