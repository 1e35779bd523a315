//! Control-plane client.
//!
//! A single background task owns the socket; callers talk to it through an
//! outbound queue and a pending-reply map keyed by correlation id. Dropped
//! connections are retried with linear backoff up to a bounded attempt
//! count; in-flight requests fail fast on every disconnect rather than
//! silently spanning two sessions.

use crate::control::protocol::{Envelope, MessageType};
use crate::error::ControlError;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};

const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// Closed deliberately by the caller.
    Closed,
    /// Gave up reconnecting.
    Errored,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    pub max_reconnects: u32,
    /// Wait before reconnect attempt N is `backoff_base * N`.
    pub backoff_base: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            max_reconnects: 5,
            backoff_base: Duration::from_millis(200),
        }
    }
}

type PushHandler = Box<dyn Fn(&Envelope) + Send + Sync>;
type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Envelope>>>>;
type Handlers = Arc<RwLock<HashMap<MessageType, Vec<PushHandler>>>>;

pub struct ControlPlaneClient {
    options: ClientOptions,
    state: Arc<RwLock<ConnectionState>>,
    pending: Pending,
    handlers: Handlers,
    outbound: mpsc::UnboundedSender<Envelope>,
    shutdown: Arc<Notify>,
}

impl ControlPlaneClient {
    /// Connect and spawn the io task. Fails if the first connection cannot
    /// be established; later drops are retried in the background.
    pub async fn connect(addr: &str, options: ClientOptions) -> Result<Self, ControlError> {
        let stream = TcpStream::connect(addr).await?;
        let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

        let state = Arc::new(RwLock::new(ConnectionState::Open));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let handlers: Handlers = Arc::new(RwLock::new(HashMap::new()));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());

        tokio::spawn(io_task(
            framed,
            addr.to_string(),
            options.clone(),
            Arc::clone(&state),
            Arc::clone(&pending),
            Arc::clone(&handlers),
            outbound_rx,
            Arc::clone(&shutdown),
        ));

        Ok(Self {
            options,
            state,
            pending,
            handlers,
            outbound,
            shutdown,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Register a handler for pushed messages of one type (broadcasts and
    /// replies nobody is waiting on).
    pub fn on<F>(&self, msg_type: MessageType, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(msg_type)
            .or_default()
            .push(Box::new(handler));
    }

    /// Send a correlated request and wait for its reply. An `error` reply
    /// surfaces as `ControlError::Remote`.
    pub async fn request(
        &self,
        msg_type: MessageType,
        data: Option<Value>,
    ) -> Result<Envelope, ControlError> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        let envelope = Envelope::new(msg_type, data, Some(id.clone()));
        if self.outbound.send(envelope).is_err() {
            self.pending.lock().remove(&id);
            return Err(self.disconnect_error());
        }

        let reply = match tokio::time::timeout(self.options.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(self.disconnect_error()),
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(ControlError::Timeout(self.options.request_timeout));
            }
        };

        if reply.msg_type == MessageType::Error {
            let message = reply
                .data
                .as_ref()
                .and_then(|d| d.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(ControlError::Remote(message));
        }
        Ok(reply)
    }

    /// Fire-and-forget notification; no correlation id, no reply expected.
    pub fn notify(&self, msg_type: MessageType, data: Option<Value>) -> Result<(), ControlError> {
        let envelope = Envelope::new(msg_type, data, None);
        self.outbound
            .send(envelope)
            .map_err(|_| self.disconnect_error())
    }

    /// Why the connection is unusable: a deliberate close vs exhausted
    /// reconnect attempts.
    fn disconnect_error(&self) -> ControlError {
        match self.state() {
            ConnectionState::Errored => {
                ControlError::ReconnectExhausted(self.options.max_reconnects)
            }
            _ => ControlError::Closed,
        }
    }

    /// Stop the io task and drop the connection.
    pub fn close(&self) {
        *self.state.write() = ConnectionState::Closed;
        self.shutdown.notify_one();
    }
}

type ClientFramed = Framed<TcpStream, LinesCodec>;

enum SessionEnd {
    Shutdown,
    ConnectionLost,
}

#[allow(clippy::too_many_arguments)]
async fn io_task(
    mut framed: ClientFramed,
    addr: String,
    options: ClientOptions,
    state: Arc<RwLock<ConnectionState>>,
    pending: Pending,
    handlers: Handlers,
    mut outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    shutdown: Arc<Notify>,
) {
    loop {
        let end = run_session(framed, &pending, &handlers, &mut outbound_rx, &shutdown).await;
        fail_pending(&pending);

        match end {
            SessionEnd::Shutdown => {
                *state.write() = ConnectionState::Closed;
                return;
            }
            SessionEnd::ConnectionLost => {
                *state.write() = ConnectionState::Disconnected;
            }
        }

        match reconnect(&addr, &options, &state, &shutdown).await {
            Some(next) => framed = next,
            None => return,
        }
    }
}

async fn run_session(
    framed: ClientFramed,
    pending: &Pending,
    handlers: &Handlers,
    outbound_rx: &mut mpsc::UnboundedReceiver<Envelope>,
    shutdown: &Notify,
) -> SessionEnd {
    let (mut sink, mut lines) = framed.split();
    loop {
        tokio::select! {
            _ = shutdown.notified() => return SessionEnd::Shutdown,
            outbound = outbound_rx.recv() => {
                let Some(envelope) = outbound else {
                    // Every client handle dropped.
                    return SessionEnd::Shutdown;
                };
                match serde_json::to_string(&envelope) {
                    Ok(text) => {
                        if sink.send(text).await.is_err() {
                            return SessionEnd::ConnectionLost;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode outbound envelope"),
                }
            }
            line = lines.next() => {
                match line {
                    Some(Ok(text)) => dispatch(&text, pending, handlers),
                    Some(Err(e)) => {
                        debug!(error = %e, "control stream error");
                        return SessionEnd::ConnectionLost;
                    }
                    None => return SessionEnd::ConnectionLost,
                }
            }
        }
    }
}

/// Route one inbound line to its waiting request or to push handlers.
fn dispatch(text: &str, pending: &Pending, handlers: &Handlers) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(e) => {
            debug!(error = %e, "dropping undecodable control message");
            return;
        }
    };
    if let Some(id) = &envelope.id {
        if let Some(waiter) = pending.lock().remove(id) {
            let _ = waiter.send(envelope);
            return;
        }
    }
    let handlers = handlers.read();
    if let Some(registered) = handlers.get(&envelope.msg_type) {
        for handler in registered {
            handler(&envelope);
        }
    }
}

/// Linear-backoff reconnect, bounded by `max_reconnects`. Returns `None`
/// once the attempts are exhausted or shutdown is requested.
async fn reconnect(
    addr: &str,
    options: &ClientOptions,
    state: &Arc<RwLock<ConnectionState>>,
    shutdown: &Notify,
) -> Option<ClientFramed> {
    for attempt in 1..=options.max_reconnects {
        *state.write() = ConnectionState::Connecting;
        let wait = options.backoff_base * attempt;
        tokio::select! {
            _ = shutdown.notified() => {
                *state.write() = ConnectionState::Closed;
                return None;
            }
            _ = tokio::time::sleep(wait) => {}
        }
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!(addr, attempt, "control connection re-established");
                *state.write() = ConnectionState::Open;
                return Some(Framed::new(
                    stream,
                    LinesCodec::new_with_max_length(MAX_LINE_BYTES),
                ));
            }
            Err(e) => {
                debug!(addr, attempt, error = %e, "reconnect attempt failed");
            }
        }
    }
    warn!(
        addr,
        attempts = options.max_reconnects,
        "giving up on control connection"
    );
    *state.write() = ConnectionState::Errored;
    None
}

/// Fail every in-flight request by dropping its reply sender.
fn fail_pending(pending: &Pending) {
    pending.lock().clear();
}
