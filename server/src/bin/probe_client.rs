//! Connects to a running server and logs the snapshots it broadcasts.

use clap::Parser;
use log::{debug, info};
use shared::{decode_snapshot_prefix, Snapshot};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8099")]
    server: String,

    /// Bytes sent right after connecting
    #[arg(short, long)]
    greeting: Option<String>,

    /// Number of snapshots to read before exiting
    #[arg(short, long, default_value = "10")]
    count: usize,
}

fn log_snapshot(index: usize, snapshot: &Snapshot) {
    info!(
        "Snapshot {}: {} types, {} objects",
        index,
        snapshot.buckets.len(),
        snapshot.object_count()
    );
    for bucket in &snapshot.buckets {
        for instance in &bucket.instances {
            info!(
                "  {}#{} {:?}",
                bucket.type_tag, instance.instance_tag, instance.fields
            );
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

    let mut stream = TcpStream::connect(&args.server).await?;
    info!("Connected to {}", args.server);

    if let Some(greeting) = &args.greeting {
        stream.write_all(greeting.as_bytes()).await?;
    }

    // Snapshots arrive back to back with no framing; peel complete ones off the front.
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut received = 0;

    while received < args.count {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            info!("Server closed the connection");
            break;
        }
        pending.extend_from_slice(&chunk[..n]);

        loop {
            match decode_snapshot_prefix(&pending) {
                Ok((snapshot, used)) => {
                    pending.drain(..used);
                    received += 1;
                    log_snapshot(received, &snapshot);
                    if received == args.count {
                        break;
                    }
                }
                Err(e) if e.is_truncated() => {
                    debug!("Waiting for more bytes ({} buffered)", pending.len());
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    info!("Received {} snapshots", received);
    Ok(())
}
