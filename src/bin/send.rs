use std::sync::Arc;

use clap::Parser;
use clap_derive::Parser;
use rudp_transfer::cli::CommonArgs;
use rudp_transfer::config::TransferConfig;
use rudp_transfer::sender::sender::Sender;
use rudp_transfer::transport::{bind_udp, ephemeral_addr_for, resolve};
use tracing::info;

/// Sends everything read from stdin to a receiver
#[derive(Parser)]
struct Args {
    /// the receiver's address as <host>:<port>
    receiver: String,

    #[clap(flatten)]
    common: CommonArgs,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    args.common.init_logging();

    let peer_addr = resolve(&args.receiver).await?;
    let defaults = if peer_addr.is_ipv4() { TransferConfig::default_ipv4() } else { TransferConfig::default_ipv6() };
    let config = Arc::new(args.common.to_config(defaults)?);

    let socket = bind_udp(ephemeral_addr_for(peer_addr)).await?;
    let sender = Sender::new(config, socket, peer_addr)?;
    info!("sending to {}", sender.peer_addr());

    let summary = sender.send_from(tokio::io::stdin()).await?;
    info!("sent {} datagrams with {} transmissions", summary.num_datagrams, summary.num_transmissions);
    Ok(())
}
