//! Client table for the stream transport
//!
//! This module tracks the connections the transport has accepted:
//! - Client id assignment, counting up from 0 and never reused; once the id
//!   space runs out further connections are refused
//! - Capacity enforcement against `max_clients`
//! - The write half of each connection, shared with the writer task
//! - The abort handle of each connection's read task, so evicting a client
//!   also stops its reader
//!
//! The table is generic over the write half so its bookkeeping can be tested
//! without sockets; the transport uses [`OwnedWriteHalf`].

use log::{debug, info, warn};
use shared::ClientId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

/// One accepted connection
#[derive(Debug)]
pub struct Connection<W> {
    /// Peer address, for logging
    pub addr: SocketAddr,
    /// Write half, locked by the writer for the duration of one write
    pub writer: Arc<Mutex<W>>,
    /// Read task, attached once it has been spawned
    reader: Option<AbortHandle>,
}

impl<W> Connection<W> {
    pub fn new(addr: SocketAddr, writer: W) -> Self {
        Self {
            addr,
            writer: Arc::new(Mutex::new(writer)),
            reader: None,
        }
    }

    fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// All connected clients, keyed by id.
///
/// Lives behind a `tokio::sync::RwLock`: the acceptor and evictions take the
/// write lock, writer lookups take the read lock.
#[derive(Debug)]
pub struct ClientManager<W = OwnedWriteHalf> {
    /// Connected clients indexed by their id
    clients: HashMap<ClientId, Connection<W>>,
    /// Id the next accepted connection receives, `None` once every id is used
    next_client_id: Option<ClientId>,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl<W> ClientManager<W> {
    /// Creates an empty table; the first client gets id 0.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: Some(0),
            max_clients,
        }
    }

    /// Attempts to add a new connection
    ///
    /// Returns the assigned id, or `None` if the table is at capacity or
    /// `ClientId::MAX` has already been handed out. A rejected connection does
    /// not consume an id.
    pub fn add_client(&mut self, addr: SocketAddr, writer: W) -> Option<ClientId> {
        if self.is_full() {
            return None;
        }

        let Some(client_id) = self.next_client_id else {
            warn!("Client ids exhausted, refusing {}", addr);
            return None;
        };
        self.next_client_id = client_id.checked_add(1);

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Connection::new(addr, writer));

        Some(client_id)
    }

    /// Records the read task of a client so removal can stop it.
    ///
    /// Returns false if the client is already gone, in which case the task is
    /// aborted straight away.
    pub fn attach_reader(&mut self, client_id: ClientId, reader: AbortHandle) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(connection) => {
                connection.reader = Some(reader);
                true
            }
            None => {
                reader.abort();
                false
            }
        }
    }

    /// Removes a client and stops its read task
    ///
    /// Returns the peer address of the removed client, or `None` if it was
    /// already gone. The socket closes once the last write half reference
    /// drops. Callers log the reason for the removal.
    pub fn remove_client(&mut self, client_id: ClientId) -> Option<SocketAddr> {
        let mut connection = self.clients.remove(&client_id)?;
        connection.close();
        debug!("Removed client {} ({})", client_id, connection.addr);
        Some(connection.addr)
    }

    /// Write half of a client, if it is still connected
    pub fn writer(&self, client_id: ClientId) -> Option<Arc<Mutex<W>>> {
        self.clients
            .get(&client_id)
            .map(|connection| Arc::clone(&connection.writer))
    }

    /// Ids of all connected clients, ascending
    pub fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drops every connection, stopping all read tasks
    pub fn clear(&mut self) {
        for (_, mut connection) in self.clients.drain() {
            connection.close();
        }
    }

    pub fn next_client_id(&self) -> Option<ClientId> {
        self.next_client_id
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_clients
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
