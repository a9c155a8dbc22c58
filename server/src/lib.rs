//! # Replication Server Library
//!
//! This library is the authoritative server side of a small real-time
//! multiplayer engine. It keeps a registry of game objects that want to be
//! replicated, encodes all of them into one MessagePack snapshot every tick,
//! and broadcasts that snapshot to every client it has heard from.
//!
//! ## Core Responsibilities
//!
//! ### Replication Registry
//! Application objects implement [`shared::Replicatable`] and register a
//! non-owning handle with the [`registry::Registry`]. The registry assigns
//! each object a unique instance tag and groups objects by type tag. Objects
//! stay owned by the application; [`registry::Replicated`] ties registration
//! to an object's lifetime.
//!
//! ### Snapshot Broadcasting
//! On every tick the [`network::NetworkEngine`] drains inbound traffic,
//! learns new players, builds one snapshot and queues a copy for every player.
//!
//! ### Connection Handling
//! The [`tcp::TcpTransport`] accepts TCP connections, assigns client ids,
//! delivers inbound bytes in 256-byte chunks and writes outbound snapshots.
//! A failed read or write only ever costs that one client its connection.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Tick
//! The registry, the engine and the application simulation all live on the
//! tick thread and are never shared. The tick thread performs no I/O: it only
//! touches the transport's bounded queues, which never block.
//!
//! ### Background Networking
//! Accepting, reading and writing run as tokio tasks. The client table sits
//! behind a read/write lock; the inbound and outbound queues are bounded
//! channels, so a slow consumer applies back-pressure instead of growing
//! memory.
//!
//! ## Module Organization
//!
//! - `registry`: object registry, instance tag assignment, scoped registration
//! - `network`: the tick engine and the inbound handler hook
//! - `transport`: the contract between the engine and a network backend
//! - `tcp`: TCP backend with acceptor, per-client reader and writer tasks
//! - `client_manager`: client table used by the TCP backend
//! - `tick`: fixed-timestep loop with pause and cooperative stop
//! - `clock`: replicated clock object run by the server binary
//! - `config`: server and transport settings
//! - `error`: error types
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::clock::ClockSimulation;
//! use server::config::ServerConfig;
//! use server::network::NetworkEngine;
//! use server::registry::Registry;
//! use server::tcp::TcpTransport;
//! use server::tick::ServerLoop;
//! use std::cell::RefCell;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let transport = TcpTransport::bind(config.transport()).await?;
//!
//!     // Objects registered here show up in every client's snapshot
//!     let registry = RefCell::new(Registry::new());
//!     let simulation = ClockSimulation::new(&registry)?;
//!
//!     let engine = NetworkEngine::new(&registry, transport);
//!     let mut server = ServerLoop::new(engine, simulation, config.tick_interval);
//!     server.run().await;
//!
//!     server.into_engine().into_transport().shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod clock;
pub mod config;
pub mod error;
pub mod network;
pub mod registry;
pub mod tcp;
pub mod tick;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use error::{ConfigError, ReplicationError, TickError, TransportError};
pub use network::{DiscardInbound, InboundHandler, NetworkEngine};
pub use registry::{handle_of, Registry, ReplicaHandle, Replicated};
pub use transport::Transport;
