//! Control-plane TCP server.
//!
//! Accept loop in the usual shape: one task per connection, a broadcast
//! channel for shutdown, and a per-connection outbound queue so bus-driven
//! pushes and request replies share one writer. Every mutation of the mock
//! table fans the full rule set out to all live connections.

use crate::control::protocol::{Envelope, MessageType};
use crate::control::router;
use crate::events::{EventBus, Topic};
use crate::generate::ResponderRegistry;
use crate::ledger::LedgerStore;
use crate::mock::store::MockStore;
use crate::settings::SettingsStore;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Shared state behind every connection.
pub struct ServerContext {
    pub mocks: Arc<MockStore>,
    pub ledger: LedgerStore,
    pub settings: SettingsStore,
    pub responders: ResponderRegistry,
    pub bus: EventBus,
    pub http: reqwest::Client,
    connections: RwLock<HashMap<u64, mpsc::UnboundedSender<Envelope>>>,
    next_conn_id: AtomicU64,
}

impl ServerContext {
    pub fn new(
        mocks: Arc<MockStore>,
        ledger: LedgerStore,
        settings: SettingsStore,
        responders: ResponderRegistry,
        bus: EventBus,
    ) -> Arc<Self> {
        let ctx = Arc::new(Self {
            mocks,
            ledger,
            settings,
            responders,
            bus,
            http: reqwest::Client::new(),
            connections: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
        });
        ctx.wire_broadcasts();
        ctx
    }

    /// Push the full rule set to every connection whenever the table changes.
    fn wire_broadcasts(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.bus.subscribe(Topic::MockConfigChanged, move |_| {
            if let Some(ctx) = weak.upgrade() {
                let envelope = Envelope::new(
                    MessageType::MockConfigUpdated,
                    Some(json!({ "mocks": ctx.mocks.export() })),
                    None,
                );
                ctx.broadcast(envelope);
            }
            Ok(())
        });
    }

    /// Send an envelope to every live connection.
    pub fn broadcast(&self, envelope: Envelope) {
        let connections = self.connections.read();
        debug!(
            msg_type = ?envelope.msg_type,
            connections = connections.len(),
            "broadcasting"
        );
        for tx in connections.values() {
            // A full/closed queue means the connection task is going away.
            let _ = tx.send(envelope.clone());
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    fn register(&self, tx: mpsc::UnboundedSender<Envelope>) -> u64 {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.connections.write().insert(id, tx);
        id
    }

    fn deregister(&self, id: u64) {
        self.connections.write().remove(&id);
    }
}

/// NDJSON control-plane listener.
pub struct ControlPlaneServer {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    shutdown: broadcast::Sender<()>,
}

impl ControlPlaneServer {
    pub async fn bind(addr: &str, ctx: Arc<ServerContext>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (shutdown, _) = broadcast::channel(1);
        info!(addr = %listener.local_addr()?, "control plane listening");
        Ok(Self {
            listener,
            ctx,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle used to stop the accept loop and all connection tasks.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown is signalled.
    pub async fn run(self) -> std::io::Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    debug!(%peer, "control connection accepted");
                    let ctx = Arc::clone(&self.ctx);
                    let shutdown_rx = self.shutdown.subscribe();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, ctx, shutdown_rx).await {
                            debug!(%peer, error = %e, "control connection ended");
                        }
                    });
                }
                _ = shutdown_rx.recv() => {
                    info!("control plane shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    ctx: Arc<ServerContext>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let (mut sink, mut lines) = framed.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    let conn_id = ctx.register(tx.clone());

    let result: anyhow::Result<()> = async {
        loop {
            tokio::select! {
                line = lines.next() => {
                    let Some(line) = line else { break };
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Some(reply) = router::handle_line(&ctx, &line).await {
                        // Through the queue so replies and broadcasts interleave
                        // whole-line atomically.
                        if tx.send(reply).is_err() {
                            break;
                        }
                    }
                }
                outbound = rx.recv() => {
                    let Some(envelope) = outbound else { break };
                    let text = serde_json::to_string(&envelope)?;
                    sink.send(text).await?;
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        Ok(())
    }
    .await;

    ctx.deregister(conn_id);
    if let Err(e) = &result {
        warn!(conn_id, error = %e, "control connection error");
    }
    result
}
