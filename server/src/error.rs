//! Error types for the replication server
//!
//! Registry failures go back to the application that tried to register or
//! encode an object. Transport failures during steady state only ever cost the
//! affected client its connection; construction failures end the process.

use shared::{ClientId, CodecError, InstanceTag, TypeTag};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised by the replication registry and snapshot building.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The handle does not point at a live object
    #[error("cannot register a null handle")]
    NullHandle,

    /// The same object is already tracked under its type tag
    #[error("object of type {type_tag} is already registered")]
    AlreadyRegistered { type_tag: TypeTag },

    /// The object refused its instance tag because it already has one
    #[error("object of type {type_tag} already has instance tag {existing}")]
    AlreadyInitialized {
        type_tag: TypeTag,
        existing: InstanceTag,
    },

    /// The instance tag counter reached the top of its range
    #[error("instance tags exhausted")]
    IdExhausted,

    /// A registered handle outlived its object
    #[error("registry holds a handle to a destroyed object of type {type_tag}")]
    CorruptRegistry { type_tag: TypeTag },

    /// The object is mutably borrowed elsewhere while the registry needs it
    #[error("replicated object is borrowed elsewhere")]
    HandleBusy,

    /// The registry itself is borrowed, e.g. a registration from inside `encode`
    #[error("registry is borrowed elsewhere")]
    RegistryBusy,

    /// The snapshot codec failed
    #[error("snapshot encoding failed: {0}")]
    Codec(#[from] CodecError),
}

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Binding or configuring the listening endpoint failed
    #[error("failed to start transport on {addr}: {source}")]
    TransportInit {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Accepting a pending connection failed
    #[error("failed to accept connection: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Writing to a client failed or was cut short
    #[error("failed to send {len} bytes to client {client_id}: {source}")]
    SendFailed {
        client_id: ClientId,
        len: usize,
        #[source]
        source: std::io::Error,
    },

    /// Reading from a client failed
    #[error("failed to receive from client {client_id}: {source}")]
    RecvFailed {
        client_id: ClientId,
        #[source]
        source: std::io::Error,
    },

    /// The client is no longer connected
    #[error("client {0} is gone")]
    ClientGone(ClientId),

    /// The outbound queue is full; the message was dropped
    #[error("outbound queue full, dropped message for client {client_id}")]
    OutboundFull { client_id: ClientId },

    /// The transport has shut down
    #[error("transport is closed")]
    Closed,
}

/// Errors raised while validating server configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("tick rate must be greater than zero")]
    ZeroTickRate,

    #[error("max clients must be greater than zero")]
    ZeroMaxClients,

    #[error("{queue} queue capacity must be greater than zero")]
    ZeroQueueCapacity { queue: &'static str },

    #[error("read chunk size must be greater than zero")]
    ZeroChunkSize,
}

/// Errors surfaced by one call to `NetworkEngine::update`.
#[derive(Debug, Error)]
pub enum TickError {
    /// The snapshot could not be built; nothing was broadcast this tick
    #[error("snapshot failed: {0}")]
    Snapshot(#[from] ReplicationError),
}
