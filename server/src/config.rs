use crate::error::ConfigError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8099;
pub const DEFAULT_MAX_CLIENTS: u16 = 16;
pub const DEFAULT_TICK_RATE: u32 = 60;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_READ_CHUNK_SIZE: usize = 256;
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_millis(100);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on; all interfaces by default.
    pub bind_host: IpAddr,
    /// TCP port to listen on.
    pub port: u16,
    /// Maximum concurrently connected clients.
    pub max_clients: u16,
    /// Fixed simulation step.
    pub tick_interval: Duration,
    /// Capacity of the reader to tick engine queue.
    pub inbound_capacity: usize,
    /// Capacity of the tick engine to writer queue.
    pub outbound_capacity: usize,
    /// Largest number of bytes delivered per inbound message.
    pub read_chunk_size: usize,
    /// How long background loops wait before rechecking the running flag.
    pub readiness_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            tick_interval: tick_interval_for_rate(DEFAULT_TICK_RATE),
            inbound_capacity: DEFAULT_QUEUE_CAPACITY,
            outbound_capacity: DEFAULT_QUEUE_CAPACITY,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.max_clients == 0 {
            return Err(ConfigError::ZeroMaxClients);
        }
        if self.inbound_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity { queue: "inbound" });
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity { queue: "outbound" });
        }
        if self.read_chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.port)
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            bind_addr: self.bind_addr(),
            max_clients: usize::from(self.max_clients),
            inbound_capacity: self.inbound_capacity,
            outbound_capacity: self.outbound_capacity,
            read_chunk_size: self.read_chunk_size,
            readiness_timeout: self.readiness_timeout,
        }
    }

    /// Approximate ticks per second, for logging.
    pub fn tick_rate(&self) -> f64 {
        1.0 / self.tick_interval.as_secs_f64()
    }
}

/// Settings consumed by the TCP transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub bind_addr: SocketAddr,
    pub max_clients: usize,
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
    pub read_chunk_size: usize,
    pub readiness_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        ServerConfig::default().transport()
    }
}

/// Converts a tick rate in Hz into the fixed step; a rate of 0 yields a zero step.
pub fn tick_interval_for_rate(tick_rate: u32) -> Duration {
    if tick_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(1.0 / f64::from(tick_rate))
}
