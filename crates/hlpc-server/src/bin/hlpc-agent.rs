//! HLPC Agent - test client for a running HLPC server.
//!
//! Connects, sends a message a number of times, prints each acknowledgement
//! and then disconnects with the sentinel message.

use anyhow::Context;
use clap::Parser;
use hlpc_core::{HlpcClient, NetworkConfig};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "hlpc-agent")]
#[command(about = "Send messages to an HLPC server")]
struct Args {
    /// Server address
    #[arg(short = 'i', long, default_value = NetworkConfig::DEFAULT_HOST)]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = NetworkConfig::DEFAULT_PORT)]
    port: u16,

    /// Message to send
    #[arg(short, long, default_value = "Hey there")]
    message: String,

    /// How many times to send the message
    #[arg(short, long, default_value_t = 1)]
    count: usize,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::WARN };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let addr = format!("{}:{}", args.host, args.port);
    let mut client = HlpcClient::connect(addr.as_str())
        .await
        .with_context(|| format!("could not connect to {}", addr))?;
    info!("Connected to {}", client.addr());

    for _ in 0..args.count {
        let ack = client.send(&args.message).await?;
        println!("{}", ack);
    }

    let ack = client.disconnect().await?;
    println!("{}", ack);

    Ok(())
}
