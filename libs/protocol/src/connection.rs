//! A single logical channel to one backend node.
//!
//! The connection dials lazily on the first send and keeps the write half
//! behind a mutex; a reader task owns the read half and routes incoming
//! reply envelopes to their pending requests by `in_reply_to`. Every
//! request completes exactly once: reply, timeout, or connection close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::error::ProtocolError;
use crate::options::EmitOptions;

/// Reply timeout when neither the call site nor the request body carries
/// one. Distinct from (and independently configurable from) the response
/// cache TTL default.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Configuration for a single backend connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Tag identifying this gateway on the backend channel.
    pub tag: String,

    /// Dataset used when a call does not name one.
    pub default_dataset: String,

    /// Backend host to dial.
    pub host_name: String,

    /// Backend port to dial.
    pub port: u16,

    /// Host peers use to route replies back to this node.
    pub receive_host_name: String,

    /// Port peers use to route replies back to this node.
    pub receive_port: u16,

    /// Reply timeout when neither options nor body carry one.
    pub default_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            tag: "fluxgate".to_string(),
            default_dataset: "Default".to_string(),
            host_name: "127.0.0.1".to_string(),
            port: 24224,
            receive_host_name: "127.0.0.1".to_string(),
            receive_port: 10030,
            default_timeout: DEFAULT_MESSAGE_TIMEOUT,
        }
    }
}

type ReplySender = oneshot::Sender<Result<Envelope, ProtocolError>>;

/// State shared with the reader task.
struct Shared {
    pending: Mutex<HashMap<String, ReplySender>>,
    closed: AtomicBool,
}

/// A logical channel to one backend node.
pub struct Connection {
    config: ConnectionConfig,
    shared: Arc<Shared>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Creates the connection without performing any I/O; the channel is
    /// dialed on the first send.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    pub fn tag(&self) -> &str {
        &self.config.tag
    }

    pub fn host_name(&self) -> &str {
        &self.config.host_name
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Address peers can use to route replies back to this node.
    pub fn route_to_self(&self) -> String {
        format!(
            "{}:{}/{}",
            self.config.receive_host_name, self.config.receive_port, self.config.tag
        )
    }

    /// Sends a request and waits for its correlated reply.
    ///
    /// The effective timeout is `options.timeout`, else the request body's
    /// `timeout` key (milliseconds), else the connection default. The reply
    /// resolves exactly once: envelope, timeout, or connection close.
    pub async fn emit_message(
        &self,
        message_type: &str,
        body: serde_json::Value,
        options: &EmitOptions,
    ) -> Result<Envelope, ProtocolError> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let timeout = options
            .timeout
            .or_else(|| body_timeout(&body))
            .unwrap_or(self.config.default_timeout);
        let dataset = options
            .dataset
            .clone()
            .unwrap_or_else(|| self.config.default_dataset.clone());

        let envelope = Envelope::request(message_type, body, Some(dataset), self.route_to_self());
        let id = envelope.id.clone();

        let (tx, mut rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id.clone(), tx);

        // close() may have drained the map between the closed check and the
        // insert; make sure this request does not slip past the drain.
        if self.is_closed() {
            self.shared.pending.lock().await.remove(&id);
            return Err(ProtocolError::ConnectionClosed);
        }

        if let Err(err) = self.send(&envelope).await {
            self.shared.pending.lock().await.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Err(_) => {
                let removed = self.shared.pending.lock().await.remove(&id).is_some();
                if removed {
                    Err(ProtocolError::Timeout {
                        elapsed_ms: timeout.as_millis() as u64,
                    })
                } else {
                    // The reader resolved the request between the timer
                    // firing and the cleanup; the delivered result wins.
                    match rx.try_recv() {
                        Ok(result) => result,
                        Err(_) => Err(ProtocolError::Timeout {
                            elapsed_ms: timeout.as_millis() as u64,
                        }),
                    }
                }
            }
        }
    }

    /// Sends a fire-and-forget notification; no reply is expected.
    pub async fn emit_notification(
        &self,
        message_type: &str,
        body: serde_json::Value,
        options: &EmitOptions,
    ) -> Result<(), ProtocolError> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let dataset = options
            .dataset
            .clone()
            .unwrap_or_else(|| self.config.default_dataset.clone());
        let envelope = Envelope::notification(message_type, body, Some(dataset));
        self.send(&envelope).await
    }

    /// Closes the channel. Idempotent. Every pending request is failed with
    /// `ConnectionClosed` so no waiter is left unresolved.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        *self.writer.lock().await = None;

        fail_all_pending(&self.shared, || ProtocolError::ConnectionClosed).await;
        debug!(host = %self.config.host_name, port = self.config.port, "connection closed");
    }

    /// Writes one envelope, dialing the backend first when needed. A failed
    /// write drops the stream so the next send redials.
    async fn send(&self, envelope: &Envelope) -> Result<(), ProtocolError> {
        let mut line = serde_json::to_vec(envelope)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            let stream = TcpStream::connect((self.config.host_name.as_str(), self.config.port))
                .await
                .map_err(|err| {
                    ProtocolError::Transport(format!(
                        "connect to {}:{} failed: {err}",
                        self.config.host_name, self.config.port
                    ))
                })?;
            let (read_half, write_half) = stream.into_split();
            let handle = tokio::spawn(read_loop(read_half, Arc::clone(&self.shared)));
            *self.reader.lock().await = Some(handle);
            *writer = Some(write_half);
            debug!(
                host = %self.config.host_name,
                port = self.config.port,
                "connected to backend"
            );
        }

        if let Some(stream) = writer.as_mut() {
            if let Err(err) = stream.write_all(&line).await {
                *writer = None;
                return Err(ProtocolError::Transport(err.to_string()));
            }
        }
        Ok(())
    }
}

/// Reads reply envelopes until the transport drops, then resolves every
/// in-flight request rather than leaving a waiter hanging.
async fn read_loop(read_half: OwnedReadHalf, shared: Arc<Shared>) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                match serde_json::from_str::<Envelope>(&line) {
                    Ok(envelope) => dispatch_reply(&shared, envelope).await,
                    Err(err) => warn!(error = %err, "discarding undecodable envelope"),
                };
            }
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "backend read failed");
                break;
            }
        }
    }

    fail_all_pending(&shared, || {
        ProtocolError::Transport("connection reset by backend".to_string())
    })
    .await;
}

async fn dispatch_reply(shared: &Shared, envelope: Envelope) {
    let Some(request_id) = envelope.in_reply_to.clone() else {
        debug!(
            message_type = %envelope.message_type,
            "ignoring envelope with no correlation id"
        );
        return;
    };

    let sender = shared.pending.lock().await.remove(&request_id);
    match sender {
        Some(tx) => {
            let result = if envelope.is_success() {
                Ok(envelope)
            } else {
                let status_code = envelope.status_code.unwrap_or(500);
                Err(ProtocolError::Backend {
                    status_code,
                    envelope: Box::new(envelope),
                })
            };
            let _ = tx.send(result);
        }
        None => {
            // Reply raced a timeout that already cleaned up; drop it.
            debug!(request_id = %request_id, "late reply for a request no longer pending");
        }
    }
}

async fn fail_all_pending(shared: &Shared, error: impl Fn() -> ProtocolError) {
    let drained: Vec<ReplySender> = {
        let mut pending = shared.pending.lock().await;
        pending.drain().map(|(_, tx)| tx).collect()
    };
    for tx in drained {
        let _ = tx.send(Err(error()));
    }
}

fn body_timeout(body: &serde_json::Value) -> Option<Duration> {
    body.get("timeout")
        .and_then(serde_json::Value::as_u64)
        .map(Duration::from_millis)
}
