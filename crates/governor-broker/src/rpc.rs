//! JSON-RPC client for the Juju API.
//!
//! Juju speaks a request/response protocol over a WebSocket: each request
//! carries a `request-id` and the matching response echoes it. Responses
//! may arrive in any order, so a reader task routes them to waiting callers
//! by id while a writer task serializes outgoing frames.
//!
//! [`RpcClient::start`] is synchronous: the frame is queued and a
//! [`PendingCall`] returned before anything is awaited. A caller that stops
//! waiting on a [`PendingCall`] can resume later without the response being
//! lost, which is what makes the all-watcher feed cancel-safe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use governor_core::{FeedError, ModelError};

/// Errors from the Juju API transport and protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// TCP connection to the controller failed.
    #[error("cannot connect to {addr}: {reason}")]
    Connect {
        /// Address that was dialed.
        addr: String,
        /// Why the connection failed.
        reason: String,
    },

    /// TLS setup or handshake failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// WebSocket handshake or framing failed.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The connection is gone; no response will arrive.
    #[error("connection closed: {0}")]
    Closed(String),

    /// The controller answered with an error.
    #[error("API error ({code}): {message}")]
    Api {
        /// Juju error code (may be empty).
        code: String,
        /// Juju error message.
        message: String,
    },

    /// A frame or result could not be encoded or decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RpcError> for FeedError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Api { code, message } => Self::Watcher(format!("{message} ({code})")),
            RpcError::Decode(m) => Self::Decode(m),
            other => Self::Closed(other.to_string()),
        }
    }
}

impl From<RpcError> for ModelError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Api { code, message } => Self::Api { code, message },
            RpcError::Decode(m) => Self::Decode(m),
            other => Self::Connection(other.to_string()),
        }
    }
}

/// Outgoing request frame.
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct RequestFrame<'a> {
    request_id: u64,
    #[serde(rename = "type")]
    facade: &'a str,
    version: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    id: &'a str,
    request: &'a str,
    params: Value,
}

/// Incoming response frame.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ResponseFrame {
    request_id: u64,
    #[serde(default)]
    response: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
}

impl ResponseFrame {
    fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(message) if !message.is_empty() => Err(RpcError::Api {
                code: self.error_code.unwrap_or_default(),
                message,
            }),
            _ => Ok(self.response),
        }
    }
}

/// A facade method to call.
#[derive(Debug, Clone, Copy)]
pub struct Method<'a> {
    /// Facade name (`Client`, `AllWatcher`, ...).
    pub facade: &'a str,
    /// Facade version.
    pub version: u32,
    /// Method name.
    pub request: &'a str,
}

impl<'a> Method<'a> {
    /// Describe `facade.request` at `version`.
    pub const fn new(facade: &'a str, version: u32, request: &'a str) -> Self {
        Self {
            facade,
            version,
            request,
        }
    }
}

type Reply = oneshot::Sender<Result<Value, RpcError>>;

/// Calls waiting for a response, or why none will come.
#[derive(Default)]
struct Waiters {
    calls: HashMap<u64, Reply>,
    closed: Option<String>,
}

impl Waiters {
    fn lock(shared: &Mutex<Self>) -> MutexGuard<'_, Self> {
        shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail every waiting call and refuse new ones.
    fn close(shared: &Mutex<Self>, reason: &str) {
        let calls = {
            let mut waiters = Self::lock(shared);
            if waiters.closed.is_none() {
                waiters.closed = Some(reason.to_owned());
            }
            std::mem::take(&mut waiters.calls)
        };
        for (_, reply) in calls {
            let _ = reply.send(Err(RpcError::Closed(reason.to_owned())));
        }
    }
}

/// A request that has been sent and whose response has not yet been taken.
#[derive(Debug)]
pub struct PendingCall {
    reply: oneshot::Receiver<Result<Value, RpcError>>,
}

impl PendingCall {
    /// Wait for the response.
    ///
    /// Cancel-safe: if the returned future is dropped, calling `wait` again
    /// resumes waiting for the same response.
    pub async fn wait(&mut self) -> Result<Value, RpcError> {
        (&mut self.reply)
            .await
            .unwrap_or_else(|_| Err(RpcError::Closed("connection dropped".to_owned())))
    }
}

/// A live API connection.
pub struct RpcClient {
    outgoing: mpsc::UnboundedSender<Message>,
    waiters: Arc<Mutex<Waiters>>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RpcClient {
    /// Open a WebSocket over an established stream and start the reader and
    /// writer tasks.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::WebSocket`] if the upgrade handshake fails.
    pub async fn handshake<S>(url: &str, stream: S) -> Result<Self, RpcError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (socket, _response) = tokio_tungstenite::client_async(url, stream)
            .await
            .map_err(|e| RpcError::WebSocket(format!("handshake with {url} failed: {e}")))?;
        Ok(Self::from_socket(socket))
    }

    /// Take over an open WebSocket.
    pub fn from_socket<S>(socket: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = socket.split();
        let (outgoing, queue) = mpsc::unbounded_channel();
        let waiters = Arc::new(Mutex::new(Waiters::default()));

        let reader = tokio::spawn(read_loop(stream, Arc::clone(&waiters)));
        let writer = tokio::spawn(write_loop(sink, queue, Arc::clone(&waiters)));

        Self {
            outgoing,
            waiters,
            next_id: AtomicU64::new(1),
            reader,
            writer,
        }
    }

    /// Queue a request and return a handle to its response.
    pub fn start(&self, method: Method<'_>, id: &str, params: Value) -> PendingCall {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, receiver) = oneshot::channel();
        let pending = PendingCall { reply: receiver };

        let frame = RequestFrame {
            request_id,
            facade: method.facade,
            version: method.version,
            id,
            request: method.request,
            params,
        };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                let _ = reply.send(Err(RpcError::Decode(e.to_string())));
                return pending;
            }
        };

        {
            let mut waiters = Waiters::lock(&self.waiters);
            if let Some(reason) = &waiters.closed {
                let _ = reply.send(Err(RpcError::Closed(reason.clone())));
                return pending;
            }
            waiters.calls.insert(request_id, reply);
        }

        debug!(request_id, facade = method.facade, request = method.request, "rpc request");
        if self.outgoing.send(Message::Text(text)).is_err() {
            Waiters::close(&self.waiters, "writer stopped");
        }
        pending
    }

    /// Send a request and wait for its raw response.
    pub async fn call(&self, method: Method<'_>, id: &str, params: Value) -> Result<Value, RpcError> {
        self.start(method, id, params).wait().await
    }

    /// Send a request and decode its response into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: Method<'_>,
        id: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        decode(self.call(method, id, params).await?)
    }

    /// Whether the connection has been lost.
    pub fn is_closed(&self) -> bool {
        Waiters::lock(&self.waiters).closed.is_some()
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Decode a response body.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::Decode(e.to_string()))
}

async fn read_loop<S>(mut stream: SplitStream<WebSocketStream<S>>, waiters: Arc<Mutex<Waiters>>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reason = loop {
        let frame: ResponseFrame = match stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "discarding unreadable rpc frame");
                    continue;
                }
            },
            Some(Ok(Message::Binary(bytes))) => match serde_json::from_slice(&bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "discarding unreadable rpc frame");
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) => break "closed by controller".to_owned(),
            Some(Ok(_)) => continue,
            Some(Err(e)) => break e.to_string(),
            None => break "stream ended".to_owned(),
        };

        let request_id = frame.request_id;
        let reply = Waiters::lock(&waiters).calls.remove(&request_id);
        match reply {
            Some(reply) => {
                let _ = reply.send(frame.into_result());
            }
            None => debug!(request_id, "response for unknown request"),
        }
    };

    warn!(reason = %reason, "rpc connection lost");
    Waiters::close(&waiters, &reason);
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut queue: mpsc::UnboundedReceiver<Message>,
    waiters: Arc<Mutex<Waiters>>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = queue.recv().await {
        if let Err(e) = sink.send(message).await {
            Waiters::close(&waiters, &format!("send failed: {e}"));
            return;
        }
    }
    let _ = sink.close().await;
}
