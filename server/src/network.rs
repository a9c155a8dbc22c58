//! Tick engine: inbound drain, snapshot build and broadcast

use crate::error::{ReplicationError, TickError, TransportError};
use crate::registry::Registry;
use crate::transport::Transport;
use log::{debug, info, warn};
use shared::{ClientId, Message};
use std::cell::RefCell;

/// Receives every inbound message once its sender has been learned.
pub trait InboundHandler {
    fn on_message(&mut self, message: &Message);
}

/// Default handler: command handling is left to the application.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardInbound;

impl InboundHandler for DiscardInbound {
    fn on_message(&mut self, _message: &Message) {}
}

impl<F: FnMut(&Message)> InboundHandler for F {
    fn on_message(&mut self, message: &Message) {
        self(message)
    }
}

/// Connects a registry to a transport.
///
/// Each [`update`](NetworkEngine::update) drains the transport, learns new
/// players, and sends every known player one snapshot of the registry.
/// Players are only ever added; a departed client keeps its slot and the
/// transport drops what is sent to it.
pub struct NetworkEngine<'r, T: Transport> {
    registry: &'r RefCell<Registry>,
    transport: T,
    players: Vec<ClientId>,
    inbound: Box<dyn InboundHandler + 'r>,
}

impl<'r, T: Transport> NetworkEngine<'r, T> {
    pub fn new(registry: &'r RefCell<Registry>, transport: T) -> Self {
        Self {
            registry,
            transport,
            players: Vec::new(),
            inbound: Box::new(DiscardInbound),
        }
    }

    pub fn set_inbound_handler(&mut self, handler: impl InboundHandler + 'r) {
        self.inbound = Box::new(handler);
    }

    /// Runs one tick.
    ///
    /// Every buffered inbound message is consumed before the snapshot is
    /// built. If the snapshot fails nothing is sent this tick, but the
    /// players learned during the drain are kept. A client whose outbound
    /// queue is full misses this snapshot; the others still get theirs.
    pub fn update(&mut self) -> Result<(), TickError> {
        while let Some(message) = self.transport.poll() {
            if !self.players.contains(&message.client_id) {
                info!("Player {} joined", message.client_id);
                self.players.push(message.client_id);
            }
            self.inbound.on_message(&message);
        }

        let snapshot = self
            .registry
            .try_borrow()
            .map_err(|_| ReplicationError::RegistryBusy)?
            .snapshot()?;

        for &client_id in &self.players {
            match self.transport.send(Message::new(client_id, snapshot.clone())) {
                Ok(()) => {}
                Err(e @ TransportError::OutboundFull { .. }) => warn!("{}", e),
                Err(e) => debug!("Snapshot for player {} not queued: {}", client_id, e),
            }
        }

        Ok(())
    }

    /// Every client seen so far, in order of first contact
    pub fn players(&self) -> &[ClientId] {
        &self.players
    }

    pub fn registry(&self) -> &'r RefCell<Registry> {
        self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}
