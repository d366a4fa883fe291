//! Event source client.
//!
//! [`EventSource::open`] connects and runs the handshake on the caller's task,
//! then spawns one read loop that frames, parses and dispatches events until
//! the connection closes. [`EventSource::close`] and [`EventSourceHandle::close`]
//! may be called from anywhere, including from inside a handler.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::watch,
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::EventSourceConfig,
    error::{EventSourceError, Result},
    handler::EventHandler,
    handshake::{self, Handshake},
    parse::{FrameBuffer, parse_record},
    policy::{ReconnectionPolicy, SharedPolicy},
    state::{CloseReason, ConnectionState, StateMachine},
    target::Target,
    transport::{BoxedTransport, Connector, TcpConnector},
};

/// State shared by the client, its handles and the read loop.
#[derive(Debug)]
pub(crate) struct Shared {
    current: Mutex<Option<Arc<StateMachine>>>,
    read_loop: Mutex<Option<JoinHandle<()>>>,
    pub(crate) stop: watch::Sender<bool>,
    /// Set while `run()` owns the handler's `on_finish`.
    pub(crate) supervised: AtomicBool,
    pub(crate) policy: SharedPolicy,
}

impl Shared {
    fn new(policy: ReconnectionPolicy) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            current: Mutex::new(None),
            read_loop: Mutex::new(None),
            stop,
            supervised: AtomicBool::new(false),
            policy: Arc::new(RwLock::new(policy)),
        }
    }

    /// Register a new attempt unless the current one is still live.
    fn begin_attempt(&self) -> Result<Arc<StateMachine>> {
        let mut current = self.current.lock();
        if let Some(existing) = current.as_ref() {
            let state = existing.state();
            if !state.is_closed() {
                return Err(EventSourceError::InvalidState {
                    from: state,
                    to: ConnectionState::Connecting,
                });
            }
        }
        let machine = Arc::new(StateMachine::connecting());
        *current = Some(Arc::clone(&machine));
        Ok(machine)
    }

    fn current(&self) -> Option<Arc<StateMachine>> {
        self.current.lock().clone()
    }

    fn ready_state(&self) -> ConnectionState {
        self.current
            .lock()
            .as_ref()
            .map_or(ConnectionState::Closed, |machine| machine.state())
    }

    fn close(&self) -> bool {
        self.stop.send_replace(true);
        self.current()
            .is_some_and(|machine| machine.close(CloseReason::Requested))
    }

    fn is_supervised(&self) -> bool {
        self.supervised.load(Ordering::Acquire)
    }

    /// Wait for the most recent read loop to deliver its last callback.
    pub(crate) async fn join_read_loop(&self) {
        let task = self.read_loop.lock().take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            error!(error = %err, "SSE read loop task failed");
        }
    }
}

/// Clone-able handle for observing and closing an [`EventSource`].
///
/// Safe to use from handlers and from other tasks.
#[derive(Clone, Debug)]
pub struct EventSourceHandle {
    shared: Arc<Shared>,
}

impl EventSourceHandle {
    /// Close the current connection and stop any reconnect supervision.
    ///
    /// No further events are dispatched once this returns.
    pub fn close(&self) {
        if self.shared.close() {
            info!("SSE connection closing (requested)");
        }
    }

    /// State of the current attempt.
    pub fn ready_state(&self) -> ConnectionState {
        self.shared.ready_state()
    }

    /// The last event ID received on any attempt.
    pub fn last_event_id(&self) -> Option<String> {
        self.shared.policy.read().last_event_id().map(str::to_string)
    }

    /// The current reconnection interval.
    pub fn retry_interval(&self) -> Duration {
        self.shared.policy.read().retry_interval()
    }
}

/// Server-Sent Events client.
///
/// Owns the configuration, the handler and the [`ReconnectionPolicy`], which
/// survive across connection attempts. Each call to [`open`](Self::open)
/// starts a fresh attempt with its own transport and frame buffer.
///
/// Dropping the client closes the current connection.
pub struct EventSource<H> {
    pub(crate) config: Arc<EventSourceConfig>,
    pub(crate) handler: Arc<H>,
    connector: Arc<dyn Connector>,
    pub(crate) shared: Arc<Shared>,
}

impl<H: EventHandler> EventSource<H> {
    /// Create a client that connects over plain TCP.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails.
    pub fn new(config: EventSourceConfig, handler: H) -> Result<Self> {
        Self::with_connector(config, handler, TcpConnector)
    }

    /// Create a client that opens transports through `connector`.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails.
    pub fn with_connector<C: Connector>(
        config: EventSourceConfig,
        handler: H,
        connector: C,
    ) -> Result<Self> {
        config.validate().map_err(EventSourceError::config)?;
        let policy = ReconnectionPolicy::new(config.retry_interval);

        Ok(Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
            connector: Arc::new(connector),
            shared: Arc::new(Shared::new(policy)),
        })
    }

    /// Open a connection.
    ///
    /// Connects, sends the request and validates the response before
    /// returning. On success the connection is `Open` and a background task
    /// dispatches events to the handler. Errors after that point are only
    /// reported through [`EventHandler::on_error`]. Once the connection
    /// closes the handler receives [`EventHandler::on_close`] and, outside
    /// [`run`](Self::run), [`EventHandler::on_finish`].
    ///
    /// # Errors
    ///
    /// - [`EventSourceError::InvalidUrl`] if the URL lacks a host or port; no
    ///   connection is attempted.
    /// - [`EventSourceError::InvalidState`] if an attempt is already
    ///   connecting or open.
    /// - [`EventSourceError::Connect`], [`EventSourceError::Timeout`],
    ///   [`EventSourceError::HandshakeIncomplete`],
    ///   [`EventSourceError::UnexpectedResponse`] or
    ///   [`EventSourceError::Read`] if the handshake fails.
    /// - [`EventSourceError::Closed`] if [`close`](Self::close) was called
    ///   before the handshake finished.
    pub async fn open(&self) -> Result<()> {
        let target = Target::parse(&self.config.url)?;
        let machine = self.shared.begin_attempt()?;
        info!(url = %self.config.url, "SSE connecting");

        let last_event_id = self
            .shared
            .policy
            .read()
            .last_event_id()
            .map(str::to_string);

        let connect_timeout = self.config.connect_timeout;
        let attempt = async {
            match timeout(
                connect_timeout,
                self.establish(&target, last_event_id.as_deref()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(EventSourceError::timeout(connect_timeout)),
            }
        };

        let established = tokio::select! {
            biased;

            _ = machine.closed() => Err(EventSourceError::Closed),
            result = attempt => result,
        };

        let (mut io, handshake) = match established {
            Ok(parts) => parts,
            Err(err) => {
                machine.close(CloseReason::HandshakeFailed);
                warn!(url = %self.config.url, error = %err, "SSE handshake failed");
                return Err(err);
            }
        };

        if machine.open().is_err() {
            let _ = io.shutdown().await;
            info!(url = %self.config.url, "SSE connection closed during handshake");
            return Err(EventSourceError::Closed);
        }

        info!(
            url = %self.config.url,
            status = %handshake.status_line,
            buffered = handshake.residual.len(),
            "SSE connection open"
        );
        self.handler.on_open();

        let read_loop = ReadLoop {
            frames: FrameBuffer::with_initial(&handshake.residual),
            io,
            machine,
            shared: Arc::clone(&self.shared),
            handler: Arc::clone(&self.handler),
            config: Arc::clone(&self.config),
        };
        *self.shared.read_loop.lock() = Some(tokio::spawn(read_loop.run()));

        Ok(())
    }

    /// Connect and run the handshake. The transport is shut down on failure.
    async fn establish(
        &self,
        target: &Target,
        last_event_id: Option<&str>,
    ) -> Result<(BoxedTransport, Handshake)> {
        let mut io = self
            .connector
            .connect(target.host(), target.port())
            .await
            .map_err(|source| EventSourceError::Connect {
                host: target.host().to_string(),
                port: target.port(),
                source,
            })?;

        match handshake::perform(
            &mut io,
            target,
            last_event_id,
            self.config.max_header_bytes,
            self.config.read_buffer_size,
        )
        .await
        {
            Ok(handshake) => Ok((io, handshake)),
            Err(err) => {
                let _ = io.shutdown().await;
                Err(err)
            }
        }
    }
}

impl<H> EventSource<H> {
    /// Close the current connection and stop any reconnect supervision.
    ///
    /// Idempotent. Safe to call concurrently with the read loop; no further
    /// events are dispatched once this returns.
    pub fn close(&self) {
        if self.shared.close() {
            info!(url = %self.config.url, "SSE connection closing (requested)");
        }
    }

    /// A handle that can close or observe this client from elsewhere.
    pub fn handle(&self) -> EventSourceHandle {
        EventSourceHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// State of the current attempt, `Closed` before the first `open()`.
    pub fn ready_state(&self) -> ConnectionState {
        self.shared.ready_state()
    }

    /// The last event ID received on any attempt.
    pub fn last_event_id(&self) -> Option<String> {
        self.shared.policy.read().last_event_id().map(str::to_string)
    }

    /// The current reconnection interval, as last set by the server.
    pub fn retry_interval(&self) -> Duration {
        self.shared.policy.read().retry_interval()
    }

    /// The configured event stream URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &EventSourceConfig {
        &self.config
    }

    /// Wait until the current attempt is closed and return why.
    ///
    /// Returns `None` if `open()` has never been called.
    pub async fn closed(&self) -> Option<CloseReason> {
        let machine = self.shared.current()?;
        Some(machine.closed().await)
    }
}

impl<H> Drop for EventSource<H> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl<H> std::fmt::Debug for EventSource<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("url", &self.config.url)
            .field("ready_state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

/// The per-connection background task. Sole reader of the transport and sole
/// mutator of the frame buffer.
struct ReadLoop<H> {
    io: BoxedTransport,
    frames: FrameBuffer,
    machine: Arc<StateMachine>,
    shared: Arc<Shared>,
    handler: Arc<H>,
    config: Arc<EventSourceConfig>,
}

impl<H: EventHandler> ReadLoop<H> {
    async fn run(mut self) {
        let (reason, failure) = self.drive().await;

        self.machine.close(reason);
        let reason = self.machine.close_reason().unwrap_or(reason);
        if let Some(err) = failure {
            self.handler.on_error(err);
        }

        if let Err(err) = self.io.shutdown().await {
            debug!(error = %err, "SSE transport shutdown failed");
        }
        info!(url = %self.config.url, reason = %reason, "SSE connection closed");
        self.handler.on_close(reason);
        if !self.shared.is_supervised() {
            self.handler.on_finish();
        }
    }

    async fn drive(&mut self) -> (CloseReason, Option<EventSourceError>) {
        let mut state = self.machine.subscribe();
        let mut chunk = BytesMut::with_capacity(self.config.read_buffer_size);

        loop {
            if !self.dispatch_pending() {
                return (CloseReason::Requested, None);
            }

            let limit = self.config.max_record_bytes;
            if self.frames.len() > limit {
                warn!(
                    url = %self.config.url,
                    buffered = self.frames.len(),
                    limit,
                    "SSE record exceeds size limit"
                );
                return (
                    CloseReason::RecordTooLarge,
                    Some(EventSourceError::RecordTooLarge { limit }),
                );
            }

            chunk.clear();
            chunk.reserve(self.config.read_buffer_size);

            let read = tokio::select! {
                biased;

                _ = state.wait_for(ConnectionState::is_closed) => {
                    return (CloseReason::Requested, None);
                }
                read = read_chunk(&mut self.io, &mut chunk, self.config.read_timeout) => read,
            };

            match read {
                Ok(0) => {
                    self.frames.finish();
                    if !self.dispatch_pending() {
                        return (CloseReason::Requested, None);
                    }
                    if !self.frames.is_empty() {
                        debug!(
                            discarded = self.frames.len(),
                            "SSE stream ended inside a record"
                        );
                    }
                    return (CloseReason::EndOfStream, None);
                }
                Ok(n) => self.frames.extend(&chunk[..n]),
                Err(err) => {
                    error!(url = %self.config.url, error = %err, "SSE read failed");
                    return (CloseReason::ReadError, Some(err));
                }
            }
        }
    }

    /// Dispatch every complete record in the buffer, in order.
    ///
    /// Returns `false` as soon as the connection is no longer open; remaining
    /// records are left undelivered.
    fn dispatch_pending(&mut self) -> bool {
        loop {
            if !self.machine.state().is_open() {
                return false;
            }

            let record = match self.frames.next_record() {
                None => return true,
                Some(Ok(record)) => record,
                Some(Err(err)) => {
                    warn!(error = %err, "SSE record is not valid UTF-8, dropped");
                    self.handler.on_error(EventSourceError::InvalidUtf8(err));
                    continue;
                }
            };

            let Some(event) = parse_record(&record, &mut self.shared.policy.write()) else {
                continue;
            };
            if event.is_empty() && !self.config.dispatch_empty_events {
                debug!("SSE empty event suppressed");
                continue;
            }

            debug!(
                event_type = ?event.event_type(),
                id = ?event.id(),
                "SSE event received"
            );
            self.handler.on_event(event);
        }
    }
}

async fn read_chunk(
    io: &mut BoxedTransport,
    chunk: &mut BytesMut,
    read_timeout: Option<Duration>,
) -> Result<usize> {
    match read_timeout {
        Some(duration) => match timeout(duration, io.read_buf(chunk)).await {
            Ok(read) => Ok(read?),
            Err(_) => Err(EventSourceError::timeout(duration)),
        },
        None => Ok(io.read_buf(chunk).await?),
    }
}
