//! Test harness: in-memory frame pipes and loopback servers.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt, sink, stream};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

use crate::protocol::{FrameSink, FrameStream};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for any single wait in a test.
pub(crate) const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Tracing
// ============================================================================

/// Installs a test subscriber honoring `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Frame Pipe
// ============================================================================

/// The far end of an in-memory WebSocket.
pub(crate) struct FramePeer {
    inbound: mpsc::UnboundedSender<Result<WsMessage, WsError>>,
    outbound: mpsc::UnboundedReceiver<WsMessage>,
}

impl FramePeer {
    /// Delivers a JSON text frame to the stream side.
    pub async fn push(&mut self, value: Value) {
        self.push_raw(WsMessage::Text(value.to_string().into()));
    }

    /// Delivers an arbitrary message to the stream side.
    pub fn push_raw(&self, message: WsMessage) {
        let _ = self.inbound.send(Ok(message));
    }

    /// Next JSON frame written to the sink side.
    pub async fn next_sent(&mut self) -> Value {
        loop {
            let message = timeout(TEST_TIMEOUT, self.outbound.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("sink closed");
            if let WsMessage::Text(text) = message {
                return serde_json::from_str(text.as_str()).expect("invalid JSON frame");
            }
        }
    }

    /// A JSON frame if one was already written.
    pub fn try_next_sent(&mut self) -> Option<Value> {
        while let Ok(message) = self.outbound.try_recv() {
            if let WsMessage::Text(text) = message {
                return serde_json::from_str(text.as_str()).ok();
            }
        }
        None
    }
}

/// Creates a connected sink/stream pair plus the peer that drives it.
///
/// Dropping the peer ends the stream.
pub(crate) fn frame_pipe() -> (FrameSink, FrameStream, FramePeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<WsMessage>();

    let sink = sink::unfold(out_tx, |tx, message: WsMessage| async move {
        tx.send(message).map_err(|_| WsError::ConnectionClosed)?;
        Ok::<_, WsError>(tx)
    });
    let stream = stream::unfold(in_rx, |mut rx| async move {
        rx.recv().await.map(|message| (message, rx))
    });

    let peer = FramePeer {
        inbound: in_tx,
        outbound: out_rx,
    };
    (Box::pin(sink), Box::pin(stream), peer)
}

/// Like [`frame_pipe`], but the sink stops completing writes after
/// `accepted` frames.
pub(crate) fn stalling_frame_pipe(accepted: usize) -> (FrameSink, FrameStream, FramePeer) {
    let (inner, stream, peer) = frame_pipe();
    let sink = sink::unfold((inner, accepted), |(mut inner, remaining), message: WsMessage| async move {
        let Some(remaining) = remaining.checked_sub(1) else {
            return std::future::pending().await;
        };
        inner.send(message).await?;
        Ok::<_, WsError>((inner, remaining))
    });
    (Box::pin(sink), stream, peer)
}

// ============================================================================
// WebSocket Server
// ============================================================================

/// How the loopback server answers `Sec-WebSocket-Protocol`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Subprotocol {
    /// Pick the first offered.
    FirstOffered,
    /// Pick this one if offered, otherwise the first offered.
    Prefer(&'static str),
    /// Always answer this one.
    Fixed(&'static str),
    /// Refuse the upgrade with this status.
    Reject(u16),
}

/// What the loopback server does after the upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
    /// Hand the connection to the test.
    Manual,
    /// Ack, then answer every subscription with one result and keep it open.
    Echo,
}

/// A server-side WebSocket.
pub(crate) struct ServerConn {
    ws: WebSocketStream<TcpStream>,
    /// The subprotocol selected for this connection.
    pub subprotocol: Option<String>,
    /// Upgrade request headers, lowercase names.
    pub headers: Vec<(String, String)>,
}

impl ServerConn {
    /// Next JSON frame from the client, `None` once closed.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            match timeout(TEST_TIMEOUT, self.ws.next()).await.ok()?? {
                Ok(WsMessage::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
                Ok(WsMessage::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Sends a JSON frame.
    pub async fn send(&mut self, value: Value) {
        let _ = self.ws.send(WsMessage::Text(value.to_string().into())).await;
    }

    /// Reads `connection_init`, answers with an ack and returns the init frame.
    pub async fn accept_init(&mut self) -> Value {
        let init = self.recv().await.expect("no connection_init");
        assert_eq!(init["type"], "connection_init");
        self.send(json!({ "type": "connection_ack" })).await;
        init
    }

    /// Reads frames until a subscribe/start frame and returns its id.
    pub async fn expect_subscribe(&mut self) -> String {
        loop {
            let frame = self.recv().await.expect("connection closed before subscribe");
            if frame["type"] == "subscribe" || frame["type"] == "start" {
                return frame["id"].as_str().unwrap_or_default().to_string();
            }
        }
    }

    /// Frame type used for results in this connection's dialect.
    pub fn next_type(&self) -> &'static str {
        match self.subprotocol.as_deref() {
            Some("graphql-ws") => "data",
            _ => "next",
        }
    }

    /// Closes the socket.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    /// Returns a request header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Loopback WebSocket server.
pub(crate) struct WsTestServer {
    /// `ws://` URL of the server.
    pub url: String,
    accepts: Arc<AtomicUsize>,
    conns: mpsc::UnboundedReceiver<ServerConn>,
    /// Every frame received in [`Behavior::Echo`] mode.
    pub frames: Arc<Mutex<Vec<Value>>>,
}

impl WsTestServer {
    /// Starts a server on an ephemeral port.
    pub async fn start(subprotocol: Subprotocol, behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = Arc::new(AtomicUsize::new(0));
        let frames = Arc::new(Mutex::new(Vec::new()));
        let (tx, conns) = mpsc::unbounded_channel();

        let counter = Arc::clone(&accepts);
        let log = Arc::clone(&frames);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let tx = tx.clone();
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let Some(conn) = upgrade(socket, subprotocol).await else {
                        return;
                    };
                    match behavior {
                        Behavior::Manual => {
                            let _ = tx.send(conn);
                        }
                        Behavior::Echo => echo(conn, log).await,
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}/graphql"),
            accepts,
            conns,
            frames,
        }
    }

    /// Number of TCP connections accepted so far.
    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    /// Next upgraded connection ([`Behavior::Manual`] only).
    pub async fn next_conn(&mut self) -> ServerConn {
        timeout(TEST_TIMEOUT, self.conns.recv())
            .await
            .expect("timed out waiting for connection")
            .expect("server stopped")
    }

    /// Number of received frames of the given type.
    pub fn count_frames(&self, kind: &str) -> usize {
        self.frames.lock().iter().filter(|f| f["type"] == kind).count()
    }
}

async fn upgrade(socket: TcpStream, choice: Subprotocol) -> Option<ServerConn> {
    let mut selected = None;
    let mut headers = Vec::new();

    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        headers = request
            .headers()
            .iter()
            .map(|(n, v)| (n.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();

        let offered: Vec<String> = request
            .headers()
            .get("sec-websocket-protocol")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').map(|p| p.trim().to_string()).collect())
            .unwrap_or_default();

        let chosen = match choice {
            Subprotocol::FirstOffered => offered.first().cloned(),
            Subprotocol::Prefer(p) => offered
                .iter()
                .find(|o| o.as_str() == p)
                .or(offered.first())
                .cloned(),
            Subprotocol::Fixed(p) => Some(p.to_string()),
            Subprotocol::Reject(status) => {
                let mut reject = ErrorResponse::new(Some("rejected".to_string()));
                *reject.status_mut() = http::StatusCode::from_u16(status).unwrap();
                return Err(reject);
            }
        };

        if let Some(p) = &chosen {
            response
                .headers_mut()
                .insert("sec-websocket-protocol", http::HeaderValue::from_str(p).unwrap());
        }
        selected = chosen;
        Ok(response)
    };

    let ws = accept_hdr_async(socket, callback).await.ok()?;
    Some(ServerConn {
        ws,
        subprotocol: selected,
        headers,
    })
}

async fn echo(mut conn: ServerConn, log: Arc<Mutex<Vec<Value>>>) {
    let next_type = conn.next_type();
    while let Some(frame) = conn.recv().await {
        log.lock().push(frame.clone());
        match frame["type"].as_str() {
            Some("connection_init") => conn.send(json!({ "type": "connection_ack" })).await,
            Some("subscribe" | "start") => {
                let id = frame["id"].clone();
                conn.send(json!({
                    "id": id.clone(),
                    "type": next_type,
                    "payload": { "data": { "echo": id } }
                }))
                .await;
            }
            Some("ping") => conn.send(json!({ "type": "pong" })).await,
            _ => {}
        }
    }
}

// ============================================================================
// SSE Server
// ============================================================================

/// Canned HTTP response for the SSE server.
#[derive(Debug, Clone)]
pub(crate) struct SseReply {
    /// Status code.
    pub status: u16,
    /// `Content-Type`, omitted when `None`.
    pub content_type: Option<&'static str>,
    /// Body chunks, written with a short pause in between.
    pub chunks: Vec<String>,
    /// Keep the connection open after the last chunk until the client leaves.
    pub hold_open: bool,
}

impl SseReply {
    /// A `200 text/event-stream` reply with the given chunks.
    pub fn events(chunks: &[&str]) -> Self {
        Self {
            status: 200,
            content_type: Some("text/event-stream"),
            chunks: chunks.iter().map(|c| (*c).to_string()).collect(),
            hold_open: false,
        }
    }

    /// Keeps the stream open after the chunks.
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

/// A request as seen by the SSE server.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    /// Request line, e.g. `POST /graphql?x=1 HTTP/1.1`.
    pub request_line: String,
    /// Headers, lowercase names.
    pub headers: Vec<(String, String)>,
    /// Raw body.
    pub body: String,
}

impl RecordedRequest {
    /// Returns a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Minimal loopback HTTP/1.1 server streaming a canned reply.
pub(crate) struct SseTestServer {
    /// `http://` URL of the endpoint.
    pub url: String,
    requests: mpsc::UnboundedReceiver<RecordedRequest>,
    disconnects: Arc<AtomicUsize>,
}

impl SseTestServer {
    /// Starts the server; every request receives `reply`.
    pub async fn start(reply: SseReply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let (tx, requests) = mpsc::unbounded_channel();
        let disconnects = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&disconnects);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let tx = tx.clone();
                let reply = reply.clone();
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    serve_sse(socket, reply, tx).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            url: format!("http://{addr}/graphql"),
            requests,
            disconnects,
        }
    }

    /// Next recorded request.
    pub async fn next_request(&mut self) -> RecordedRequest {
        timeout(TEST_TIMEOUT, self.requests.recv())
            .await
            .expect("timed out waiting for request")
            .expect("server stopped")
    }

    /// Number of finished connections.
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

async fn serve_sse(
    mut socket: TcpStream,
    reply: SseReply,
    requests: mpsc::UnboundedSender<RecordedRequest>,
) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    let _ = requests.send(request);

    let reason = http::StatusCode::from_u16(reply.status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let mut head = format!("HTTP/1.1 {} {reason}\r\nconnection: close\r\n", reply.status);
    if let Some(content_type) = reply.content_type {
        head.push_str(&format!("content-type: {content_type}\r\n"));
    }
    head.push_str("\r\n");
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }

    for chunk in &reply.chunks {
        if socket.write_all(chunk.as_bytes()).await.is_err() {
            return;
        }
        let _ = socket.flush().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    if reply.hold_open {
        // Wait for the client to hang up.
        let mut buf = [0u8; 256];
        while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
    }
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];

    let header_end = loop {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(n, _)| n == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }

    Some(RecordedRequest {
        request_line,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}
