//! Types shared by the replication server and its clients.
//!
//! A client only needs this crate to make sense of what the server puts on the
//! wire: the [`Message`] record the transport moves around, the
//! [`Replicatable`] contract objects implement on the server side, and the
//! snapshot codec that turns a set of objects into one MessagePack payload and
//! back.

pub mod error;
pub mod replicatable;
pub mod snapshot;

pub use error::CodecError;
pub use replicatable::{
    FieldWriter, InstanceSlot, InstanceTag, Replicatable, TypeTag, UNINITIALIZED_INSTANCE,
};
pub use snapshot::{
    decode_snapshot, decode_snapshot_prefix, Field, Snapshot, SnapshotBucket, SnapshotEncoder,
    SnapshotInstance,
};

/// Identifier the transport assigns to each accepted connection, counting up from 0.
pub type ClientId = u32;

/// One unit of traffic between the transport and the tick engine.
///
/// Inbound, the body is whatever arrived on the wire in a single read. An empty
/// body is the transport's way of announcing a freshly connected client.
/// Outbound, the body is written to the client's stream as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub client_id: ClientId,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(client_id: ClientId, body: impl Into<Vec<u8>>) -> Self {
        Self {
            client_id,
            body: body.into(),
        }
    }

    /// The zero-body message published when `client_id` connects.
    pub fn connected(client_id: ClientId) -> Self {
        Self {
            client_id,
            body: Vec::new(),
        }
    }

    pub fn is_connect_notice(&self) -> bool {
        self.body.is_empty()
    }
}
