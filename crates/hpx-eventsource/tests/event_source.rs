//! Integration tests for the event source client.
//!
//! Scripted TCP servers control exactly how the response is chunked; a hyper
//! server checks interoperability with a real HTTP/1 implementation.

use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use hpx_eventsource::{
    ChannelHandler, CloseReason, ConnectionState, Event, EventHandler, EventReceiver, EventSource,
    EventSourceConfig, EventSourceError, EventSourceHandle, FnHandler,
};
use http_body_util::Full;
use hyper::{
    Request, Response,
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::timeout,
};

const OK_HEAD: &str = "HTTP/1.0 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\n\r\n";

// ---------------------------------------------------------------------------
// Scripted TCP server
// ---------------------------------------------------------------------------

/// What the scripted server observed.
#[derive(Debug, PartialEq, Eq)]
enum Observed {
    Request(String),
    ClientClosed,
}

/// One scripted connection: the chunks to send and whether to keep the
/// socket open until the client hangs up.
struct Script {
    chunks: Vec<Vec<u8>>,
    hold_open: bool,
}

impl Script {
    fn new(chunks: &[&[u8]], hold_open: bool) -> Self {
        Self {
            chunks: chunks.iter().map(|chunk| chunk.to_vec()).collect(),
            hold_open,
        }
    }
}

/// Serve one script per accepted connection, in order.
async fn start_scripted_server(
    scripts: Vec<Script>,
) -> (SocketAddr, mpsc::UnboundedReceiver<Observed>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for script in scripts {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(serve_script(socket, script, tx.clone()));
        }
    });

    (addr, rx)
}

async fn serve_script(mut socket: TcpStream, script: Script, tx: mpsc::UnboundedSender<Observed>) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while memchr::memmem::find(&request, b"\r\n\r\n").is_none() {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    let _ = tx.send(Observed::Request(
        String::from_utf8_lossy(&request).into_owned(),
    ));

    for chunk in script.chunks {
        if socket.write_all(&chunk).await.is_err() {
            return;
        }
        let _ = socket.flush().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    if script.hold_open {
        while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
        let _ = tx.send(Observed::ClientClosed);
    }
}

// ---------------------------------------------------------------------------
// hyper server
// ---------------------------------------------------------------------------

/// Start a hyper server that answers every request with `body`.
async fn start_hyper_server(body: &'static str, content_type: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let io = TokioIo::new(stream);
            let _ = http1::Builder::new()
                .serve_connection(
                    io,
                    service_fn(move |_req: Request<Incoming>| {
                        let resp = Response::builder()
                            .status(200)
                            .header("content-type", content_type)
                            .body(Full::new(Bytes::from(body)))
                            .expect("build response");
                        async move { Ok::<_, Infallible>(resp) }
                    }),
                )
                .await;
        }
    });

    addr
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(addr: SocketAddr) -> EventSourceConfig {
    EventSourceConfig::new(format!("http://{addr}/events?topic=t"))
        .connect_timeout(Duration::from_secs(2))
}

fn channel_source(config: EventSourceConfig) -> (EventSource<ChannelHandler>, EventReceiver) {
    let (handler, rx) = ChannelHandler::new();
    let source = EventSource::new(config, handler).expect("create event source");
    (source, rx)
}

async fn next_event(rx: &mut EventReceiver) -> Event {
    timeout(Duration::from_secs(2), rx.next_event())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
        .expect("stream error")
}

async fn next_data(rx: &mut EventReceiver) -> String {
    next_event(rx).await.data().unwrap_or_default().to_string()
}

async fn observed(rx: &mut mpsc::UnboundedReceiver<Observed>) -> Observed {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for server")
        .expect("server gone")
}

async fn wait_closed<H: EventHandler>(source: &EventSource<H>) -> CloseReason {
    timeout(Duration::from_secs(2), source.closed())
        .await
        .expect("timed out waiting for close")
        .expect("connection was opened")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_events_delivered_in_order_across_chunks() {
    let head_and_partial = format!("{OK_HEAD}da");
    let (addr, mut server) = start_scripted_server(vec![Script::new(
        &[
            head_and_partial.as_bytes(),
            b"ta: one\n",
            b"\ndata: tw",
            b"o\ndata: lines\n\n",
            b"event: update\nid: 1\ndata: three\n\n",
        ],
        false,
    )])
    .await;

    let (source, mut rx) = channel_source(config(addr));
    source.open().await.expect("open");
    assert_eq!(source.ready_state(), ConnectionState::Open);

    match observed(&mut server).await {
        Observed::Request(request) => {
            assert!(request.starts_with("GET /events?topic=t HTTP/1.0\r\n"));
            assert!(request.contains("\r\nAccept: text/event-stream\r\n"));
            assert!(request.contains("\r\nCache-Control: no-cache\r\n"));
            assert!(request.contains("\r\nConnection: keep-alive\r\n"));
            assert!(!request.contains("Last-Event-ID"));
        }
        other => panic!("unexpected observation: {other:?}"),
    }

    assert_eq!(next_data(&mut rx).await, "one");
    assert_eq!(next_data(&mut rx).await, "two\nlines");

    let event = next_event(&mut rx).await;
    assert_eq!(event.event_type(), Some("update"));
    assert_eq!(event.id(), Some("1"));
    assert_eq!(event.data(), Some("three"));

    assert_eq!(wait_closed(&source).await, CloseReason::EndOfStream);
    assert_eq!(source.ready_state(), ConnectionState::Closed);
    assert_eq!(source.last_event_id().as_deref(), Some("1"));
}

#[tokio::test]
async fn test_hyper_server_interop() {
    let addr = start_hyper_server(
        ": keep-alive\n\nevent: greeting\ndata: hello\n\ndata: world\n\n",
        "text/event-stream",
    )
    .await;

    let (source, mut rx) = channel_source(config(addr));
    source.open().await.expect("open");

    let first = next_event(&mut rx).await;
    assert_eq!(first.event_type(), Some("greeting"));
    assert_eq!(first.data(), Some("hello"));
    assert_eq!(next_data(&mut rx).await, "world");

    source.close();
    wait_closed(&source).await;
    assert_eq!(source.ready_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_wrong_content_type_is_rejected() {
    let addr = start_hyper_server("{}", "application/json").await;

    let (source, _rx) = channel_source(config(addr));
    let err = source.open().await.expect_err("must fail");
    assert!(
        matches!(err, EventSourceError::UnexpectedResponse { .. }),
        "unexpected error: {err:?}"
    );
    assert_eq!(source.ready_state(), ConnectionState::Closed);
    assert_eq!(wait_closed(&source).await, CloseReason::HandshakeFailed);
}

#[tokio::test]
async fn test_not_found_closes_transport() {
    let (addr, mut server) = start_scripted_server(vec![Script::new(
        &[b"HTTP/1.0 404 Not Found\r\nContent-Type: text/plain\r\n\r\nnope"],
        true,
    )])
    .await;

    let (source, _rx) = channel_source(config(addr));
    match source.open().await {
        Err(EventSourceError::UnexpectedResponse { status_line, .. }) => {
            assert_eq!(status_line, "HTTP/1.0 404 Not Found");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(source.ready_state(), ConnectionState::Closed);

    assert!(matches!(observed(&mut server).await, Observed::Request(_)));
    assert_eq!(observed(&mut server).await, Observed::ClientClosed);
}

#[tokio::test]
async fn test_close_from_handler_halts_dispatch() {
    let body = format!("{OK_HEAD}data: 1\n\ndata: 2\n\ndata: 3\n\ndata: 4\n\n");
    let (addr, mut server) =
        start_scripted_server(vec![Script::new(&[body.as_bytes()], true)]).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let slot: Arc<Mutex<Option<EventSourceHandle>>> = Arc::new(Mutex::new(None));
    let handler = {
        let seen = Arc::clone(&seen);
        let slot = Arc::clone(&slot);
        FnHandler::new().on_message(move |event| {
            seen.lock().push(event.data().unwrap_or_default().to_string());
            if let Some(handle) = slot.lock().as_ref() {
                handle.close();
            }
        })
    };

    let source = EventSource::new(config(addr), handler).expect("create event source");
    *slot.lock() = Some(source.handle());

    source.open().await.expect("open");
    assert_eq!(wait_closed(&source).await, CloseReason::Requested);

    assert!(matches!(observed(&mut server).await, Observed::Request(_)));
    assert_eq!(observed(&mut server).await, Observed::ClientClosed);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*seen.lock(), vec!["1".to_string()]);
    assert_eq!(source.ready_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_close_while_idle() {
    let (addr, mut server) =
        start_scripted_server(vec![Script::new(&[OK_HEAD.as_bytes()], true)]).await;

    let (source, _rx) = channel_source(config(addr));
    source.open().await.expect("open");
    assert!(matches!(observed(&mut server).await, Observed::Request(_)));

    let handle = source.handle();
    assert_eq!(handle.ready_state(), ConnectionState::Open);
    handle.close();
    handle.close();
    source.close();

    assert_eq!(wait_closed(&source).await, CloseReason::Requested);
    assert_eq!(observed(&mut server).await, Observed::ClientClosed);
    assert_eq!(handle.ready_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_invalid_utf8_is_reported_and_skipped() {
    let mut body = OK_HEAD.as_bytes().to_vec();
    body.extend_from_slice(b"data: \xff\xfe\n\ndata: ok\n\n");
    let (addr, _server) = start_scripted_server(vec![Script {
        chunks: vec![body],
        hold_open: false,
    }])
    .await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let utf8_errors = Arc::new(Mutex::new(0usize));
    let handler = {
        let events = Arc::clone(&events);
        let utf8_errors = Arc::clone(&utf8_errors);
        FnHandler::new()
            .on_message(move |event| events.lock().push(event.data().map(str::to_string)))
            .on_error(move |err| {
                if matches!(err, EventSourceError::InvalidUtf8(_)) {
                    *utf8_errors.lock() += 1;
                }
            })
    };

    let source = EventSource::new(config(addr), handler).expect("create event source");
    source.open().await.expect("open");
    assert_eq!(wait_closed(&source).await, CloseReason::EndOfStream);

    assert_eq!(*events.lock(), vec![Some("ok".to_string())]);
    assert_eq!(*utf8_errors.lock(), 1);
}

#[tokio::test]
async fn test_invalid_url() {
    for url in ["not a url", "unix:/var/run/events.sock"] {
        let (source, _rx) = channel_source(EventSourceConfig::new(url));
        let err = source.open().await.expect_err("invalid url");
        assert!(matches!(err, EventSourceError::InvalidUrl { .. }));
        assert!(err.is_fatal());
        assert_eq!(source.ready_state(), ConnectionState::Closed);
        assert_eq!(source.closed().await, None);
    }
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let (source, _rx) = channel_source(config(addr));
    let err = source.open().await.expect_err("refused");
    match err {
        EventSourceError::Connect { host, port, .. } => {
            assert_eq!(host, "127.0.0.1");
            assert_eq!(port, addr.port());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(source.ready_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_run_reconnects_with_last_event_id() {
    let first = format!("{OK_HEAD}retry: 10\nid: 41\ndata: a\n\n");
    let second = format!("{OK_HEAD}id: 42\ndata: b\n\n");
    let (addr, mut server) = start_scripted_server(vec![
        Script::new(&[first.as_bytes()], false),
        Script::new(&[second.as_bytes()], true),
    ])
    .await;

    let (source, mut rx) = channel_source(config(addr).reconnect_jitter(0.0));
    let source = Arc::new(source);
    let handle = source.handle();
    let supervisor = {
        let source = Arc::clone(&source);
        tokio::spawn(async move { source.run().await })
    };

    assert_eq!(next_data(&mut rx).await, "a");
    assert_eq!(next_data(&mut rx).await, "b");

    match observed(&mut server).await {
        Observed::Request(request) => assert!(!request.contains("Last-Event-ID")),
        other => panic!("unexpected observation: {other:?}"),
    }
    match observed(&mut server).await {
        Observed::Request(request) => assert!(request.contains("\r\nLast-Event-ID: 41\r\n")),
        other => panic!("unexpected observation: {other:?}"),
    }

    assert_eq!(handle.retry_interval(), Duration::from_millis(10));
    assert_eq!(handle.last_event_id().as_deref(), Some("42"));

    handle.close();
    timeout(Duration::from_secs(2), supervisor)
        .await
        .expect("supervisor did not stop")
        .expect("join")
        .expect("run");
    assert_eq!(observed(&mut server).await, Observed::ClientClosed);
}

#[tokio::test]
async fn test_run_gives_up_after_max_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let failures = Arc::new(Mutex::new(0u32));
    let handler = {
        let failures = Arc::clone(&failures);
        FnHandler::new().on_error(move |_| *failures.lock() += 1)
    };
    let config = config(addr)
        .retry_interval(Duration::from_millis(10))
        .reconnect_max_delay(Duration::from_millis(50))
        .reconnect_jitter(0.0)
        .reconnect_max_attempts(Some(2));
    let source = EventSource::new(config, handler).expect("create event source");

    let err = timeout(Duration::from_secs(2), source.run())
        .await
        .expect("run did not finish")
        .expect_err("must give up");
    assert!(matches!(
        err,
        EventSourceError::ReconnectExhausted { attempts: 2 }
    ));
    assert_eq!(*failures.lock(), 3);
}

#[tokio::test]
async fn test_run_stops_on_fatal_error() {
    let (source, _rx) = channel_source(EventSourceConfig::new("not a url"));
    let err = timeout(Duration::from_secs(2), source.run())
        .await
        .expect("run did not finish")
        .expect_err("fatal");
    assert!(matches!(err, EventSourceError::InvalidUrl { .. }));
}

/// Closes its event source from `on_close`.
#[derive(Default)]
struct CloseOnClose {
    handle: Mutex<Option<EventSourceHandle>>,
    closes: Mutex<Vec<CloseReason>>,
    finished: Mutex<bool>,
}

impl EventHandler for CloseOnClose {
    fn on_event(&self, _event: Event) {}

    fn on_close(&self, reason: CloseReason) {
        self.closes.lock().push(reason);
        if let Some(handle) = self.handle.lock().as_ref() {
            handle.close();
        }
    }

    fn on_finish(&self) {
        *self.finished.lock() = true;
    }
}

#[tokio::test]
async fn test_run_honors_close_from_on_close() {
    let body = format!("{OK_HEAD}data: only\n\n");
    let (addr, mut server) = start_scripted_server(vec![
        Script::new(&[body.as_bytes()], false),
        Script::new(&[OK_HEAD.as_bytes()], true),
    ])
    .await;

    let handler = Arc::new(CloseOnClose::default());
    let config = config(addr).reconnect_max_attempts(Some(0));
    let source = EventSource::new(config, Arc::clone(&handler)).expect("create event source");
    *handler.handle.lock() = Some(source.handle());

    timeout(Duration::from_secs(2), source.run())
        .await
        .expect("run did not finish")
        .expect("close must stop supervision cleanly");

    assert_eq!(*handler.closes.lock(), vec![CloseReason::EndOfStream]);
    assert!(*handler.finished.lock());
    assert!(matches!(observed(&mut server).await, Observed::Request(_)));
    assert!(
        timeout(Duration::from_millis(100), server.recv())
            .await
            .is_err(),
        "no second connection expected"
    );
}

#[tokio::test]
async fn test_channel_receiver_ends_when_run_returns() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let config = config(addr)
        .retry_interval(Duration::from_millis(10))
        .reconnect_max_delay(Duration::from_millis(50))
        .reconnect_jitter(0.0)
        .reconnect_max_attempts(Some(1));
    let (source, mut rx) = channel_source(config);

    let err = timeout(Duration::from_secs(2), source.run())
        .await
        .expect("run did not finish")
        .expect_err("must give up");
    assert!(matches!(
        err,
        EventSourceError::ReconnectExhausted { attempts: 1 }
    ));

    let mut failures = 0;
    while let Some(item) = timeout(Duration::from_secs(2), rx.next_event())
        .await
        .expect("receiver did not end")
    {
        assert!(matches!(item, Err(EventSourceError::Connect { .. })));
        failures += 1;
    }
    assert_eq!(failures, 2);
}
