//! Entry point for `serial-mux`.
//!
//! Parses CLI arguments and dispatches into either **listen** or **dial**
//! mode, using a TCP stream as the unreliable byte pipe standing in for a
//! UART.  All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, argument parsing) and the demo exchange.

use clap::{Parser, Subcommand};
use tokio::net::{TcpListener, TcpStream};

use serial_mux::{Link, Packet, PacketType};

/// Reliable packet transport over an unreliable byte stream.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Wait for a peer byte stream and echo received packets back.
    Listen {
        /// Local address to bind (e.g. 127.0.0.1:9000).
        #[arg(short, long, default_value = "127.0.0.1:9000")]
        bind: String,
    },
    /// Connect to a listening peer and send a demo command packet.
    Dial {
        /// Peer address (e.g. 127.0.0.1:9000).
        #[arg(short, long, default_value = "127.0.0.1:9000")]
        peer: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Listen { bind } => {
            let listener = TcpListener::bind(&bind).await?;
            log::info!("listening on {bind}");
            let (stream, peer) = listener.accept().await?;
            log::info!("byte stream connected from {peer}");

            let mut link = Link::open(stream);
            link.ready().await?;
            log::info!("link active");

            while let Some(packet) = link.recv().await {
                log::info!(
                    "delivered {:?} packet with {} byte payload, echoing",
                    packet.ptype,
                    packet.payload.len()
                );
                link.send(Packet::new(PacketType::AclData, packet.payload))
                    .await?;
            }
            log::info!("peer went away");
        }
        Mode::Dial { peer } => {
            let stream = TcpStream::connect(&peer).await?;
            log::info!("byte stream connected to {peer}");

            let mut link = Link::open(stream);
            link.ready().await?;
            log::info!("link active");

            link.send(Packet::new(
                PacketType::Command,
                b"hello over the wire".to_vec(),
            ))
            .await?;

            match link.recv().await {
                Some(echo) => log::info!(
                    "echo came back: {:?}",
                    String::from_utf8_lossy(&echo.payload)
                ),
                None => log::warn!("link closed before the echo arrived"),
            }
            link.close().await;
        }
    }

    Ok(())
}
