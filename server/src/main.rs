use clap::Parser;
use log::{info, warn};
use server::clock::ClockSimulation;
use server::config::{
    tick_interval_for_rate, ServerConfig, DEFAULT_MAX_CLIENTS, DEFAULT_PORT,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_TICK_RATE,
};
use server::network::NetworkEngine;
use server::registry::Registry;
use server::tcp::TcpTransport;
use server::tick::ServerLoop;
use std::cell::RefCell;
use std::net::IpAddr;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// TCP port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum number of concurrent clients
    #[arg(short, long, default_value_t = DEFAULT_MAX_CLIENTS)]
    max_clients: u16,

    /// Ticks per second
    #[arg(short, long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// Capacity of the inbound and outbound queues
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Start with the simulation paused
    #[arg(long)]
    start_paused: bool,
}

impl Args {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            bind_host: self.host,
            port: self.port,
            max_clients: self.max_clients,
            tick_interval: tick_interval_for_rate(self.tick_rate),
            inbound_capacity: self.queue_capacity,
            outbound_capacity: self.queue_capacity,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=debug for detailed logging");
    }

    let args = Args::parse();
    let config = args.config();
    config.validate()?;

    let transport = TcpTransport::bind(config.transport()).await?;
    info!(
        "Server started on {} at {:.0} Hz, up to {} clients",
        transport.local_addr(),
        config.tick_rate(),
        config.max_clients
    );

    let registry = RefCell::new(Registry::new());
    let simulation = ClockSimulation::new(&registry)?;
    let engine = NetworkEngine::new(&registry, transport);
    let mut server = ServerLoop::new(engine, simulation, config.tick_interval);

    let control = server.control();
    control.set_paused(args.start_paused);
    if args.start_paused {
        info!("Simulation paused");
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                control.stop();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await;

    let transport = server.into_engine().into_transport();
    transport.shutdown().await;

    info!("Server stopped");
    Ok(())
}
