//! Reliable-stream transport over TCP
//!
//! Three kinds of background task move bytes for the tick engine:
//! - The acceptor owns the listener. It hands each accepted connection an id,
//!   publishes the connect notice and spawns that connection's read task.
//! - One read task per client pushes every chunk it reads into the bounded
//!   inbound queue, in wire order.
//! - The writer drains the bounded outbound queue in FIFO order and writes each
//!   body to its client, evicting the client if the write fails.
//!
//! The tick engine only touches the two queues, so [`Transport::poll`] and
//! [`Transport::send`] never block. Background loops wake at least every
//! `readiness_timeout` to notice that the transport is shutting down.

use crate::client_manager::ClientManager;
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::transport::Transport;
use log::{debug, error, info, warn};
use shared::{ClientId, Message};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;

type SharedClients<W = OwnedWriteHalf> = Arc<RwLock<ClientManager<W>>>;

/// TCP implementation of [`Transport`]. Must be created inside a tokio runtime.
pub struct TcpTransport {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    clients: SharedClients,
    inbound_rx: mpsc::Receiver<Message>,
    outbound_tx: mpsc::Sender<Message>,
    acceptor: Option<JoinHandle<TcpListener>>,
    writer: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Binds the listener and starts the background tasks.
    pub async fn bind(config: TransportConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| TransportError::TransportInit {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::TransportInit {
                addr: config.bind_addr,
                source,
            })?;

        let running = Arc::new(AtomicBool::new(true));
        let clients = Arc::new(RwLock::new(ClientManager::new(config.max_clients)));
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);

        let acceptor = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&clients),
            inbound_tx,
            Arc::clone(&running),
            config.read_chunk_size,
            config.readiness_timeout,
        ));
        let writer = tokio::spawn(write_loop(
            outbound_rx,
            Arc::clone(&clients),
            Arc::clone(&running),
            config.readiness_timeout,
        ));

        info!(
            "Transport listening on {} (max {} clients)",
            local_addr, config.max_clients
        );

        Ok(Self {
            local_addr,
            running,
            clients,
            inbound_rx,
            outbound_tx,
            acceptor: Some(acceptor),
            writer: Some(writer),
        })
    }

    /// Address the listener is bound to, with the real port when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn client_ids(&self) -> Vec<ClientId> {
        self.clients.read().await.client_ids()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops the transport: waits for the acceptor and writer to exit, then
    /// closes every client connection, then closes the listener.
    ///
    /// The inbound queue is closed first, so a task waiting for room in it
    /// gives up instead of holding the join.
    pub async fn shutdown(mut self) {
        self.running.store(false, Ordering::Release);
        self.inbound_rx.close();

        let listener = match self.acceptor.take() {
            Some(acceptor) => match acceptor.await {
                Ok(listener) => Some(listener),
                Err(e) => {
                    error!("Acceptor task failed: {}", e);
                    None
                }
            },
            None => None,
        };

        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.await {
                error!("Writer task failed: {}", e);
            }
        }

        self.clients.write().await.clear();
        drop(listener);

        info!("Transport on {} shut down", self.local_addr);
    }
}

impl Transport for TcpTransport {
    fn poll(&mut self) -> Option<Message> {
        self.inbound_rx.try_recv().ok()
    }

    fn send(&mut self, message: Message) -> Result<(), TransportError> {
        if !self.is_running() {
            return Err(TransportError::Closed);
        }

        self.outbound_tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(message) => TransportError::OutboundFull {
                client_id: message.client_id,
            },
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if self.acceptor.is_none() && self.writer.is_none() {
            return;
        }

        // Dropped without shutdown: stop everything without waiting.
        self.running.store(false, Ordering::Release);
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Ok(mut clients) = self.clients.try_write() {
            clients.clear();
        }
    }
}

/// Accepts connections until the transport stops, then hands the listener back.
async fn accept_loop(
    listener: TcpListener,
    clients: SharedClients,
    inbound_tx: mpsc::Sender<Message>,
    running: Arc<AtomicBool>,
    read_chunk_size: usize,
    readiness_timeout: Duration,
) -> TcpListener {
    while running.load(Ordering::Acquire) {
        let (stream, addr) = match timeout(readiness_timeout, listener.accept()).await {
            // Nothing ready
            Err(_) => continue,
            Ok(Err(e)) => {
                warn!("{}", TransportError::AcceptFailed(e));
                continue;
            }
            Ok(Ok(accepted)) => accepted,
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", addr, e);
        }

        let (read_half, write_half) = stream.into_split();
        let client_id = {
            let mut table = clients.write().await;
            match table.add_client(addr, write_half) {
                Some(client_id) => client_id,
                None => {
                    if table.is_full() {
                        warn!("Server full, closing connection from {}", addr);
                    }
                    continue;
                }
            }
        };

        // The notice must be queued before the client's first chunk.
        let notice = Message::connected(client_id);
        if !publish(&inbound_tx, notice, &running, readiness_timeout).await {
            break;
        }

        let reader = tokio::spawn(read_loop(
            client_id,
            read_half,
            read_chunk_size,
            inbound_tx.clone(),
            Arc::clone(&clients),
            Arc::clone(&running),
            readiness_timeout,
        ));
        clients
            .write()
            .await
            .attach_reader(client_id, reader.abort_handle());
    }

    debug!("Acceptor stopped");
    listener
}

/// Queues one inbound message, waiting while the queue is full.
///
/// Returns false once the queue is closed or the transport stops, in which
/// case the message is dropped.
async fn publish(
    inbound_tx: &mpsc::Sender<Message>,
    message: Message,
    running: &AtomicBool,
    readiness_timeout: Duration,
) -> bool {
    while running.load(Ordering::Acquire) {
        match timeout(readiness_timeout, inbound_tx.reserve()).await {
            Ok(Ok(permit)) => {
                permit.send(message);
                return true;
            }
            Ok(Err(_)) => return false,
            // Still full
            Err(_) => continue,
        }
    }
    false
}

/// Forwards every chunk read from one client to the inbound queue.
async fn read_loop(
    client_id: ClientId,
    mut read_half: OwnedReadHalf,
    read_chunk_size: usize,
    inbound_tx: mpsc::Sender<Message>,
    clients: SharedClients,
    running: Arc<AtomicBool>,
    readiness_timeout: Duration,
) {
    let mut buffer = vec![0u8; read_chunk_size];

    loop {
        match read_half.read(&mut buffer).await {
            Ok(0) => {
                info!("Client {} disconnected", client_id);
                break;
            }
            Ok(n) => {
                // A full queue holds this reader back instead of growing memory
                let chunk = Message::new(client_id, &buffer[..n]);
                if !publish(&inbound_tx, chunk, &running, readiness_timeout).await {
                    return;
                }
            }
            Err(source) => {
                warn!(
                    "Dropping client: {}",
                    TransportError::RecvFailed { client_id, source }
                );
                break;
            }
        }
    }

    clients.write().await.remove_client(client_id);
}

/// Drains the outbound queue until the transport stops.
async fn write_loop<W: AsyncWrite + Unpin>(
    mut outbound_rx: mpsc::Receiver<Message>,
    clients: SharedClients<W>,
    running: Arc<AtomicBool>,
    readiness_timeout: Duration,
) {
    while running.load(Ordering::Acquire) {
        let message = match timeout(readiness_timeout, outbound_rx.recv()).await {
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(message)) => message,
        };

        match deliver(&clients, &message).await {
            Ok(()) => {}
            Err(TransportError::ClientGone(client_id)) => {
                debug!("Dropping message for departed client {}", client_id);
            }
            Err(e) => {
                // The reader may have removed it first
                if let Some(addr) = clients.write().await.remove_client(message.client_id) {
                    warn!("Evicted client {} ({}): {}", message.client_id, addr, e);
                }
            }
        }
    }

    debug!("Writer stopped");
}

/// Writes one message body to its client.
///
/// The client table lock is released before the write starts; only the
/// client's own write half stays locked while bytes go out.
async fn deliver<W: AsyncWrite + Unpin>(
    clients: &SharedClients<W>,
    message: &Message,
) -> Result<(), TransportError> {
    let writer = clients.read().await.writer(message.client_id);
    let writer = writer.ok_or(TransportError::ClientGone(message.client_id))?;

    let mut stream = writer.lock().await;
    stream
        .write_all(&message.body)
        .await
        .map_err(|source| TransportError::SendFailed {
            client_id: message.client_id,
            len: message.body.len(),
            source,
        })
}
