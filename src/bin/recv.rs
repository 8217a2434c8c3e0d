use std::sync::Arc;

use clap::Parser;
use clap_derive::Parser;
use rudp_transfer::cli::CommonArgs;
use rudp_transfer::config::TransferConfig;
use rudp_transfer::receiver::receiver::Receiver;
use rudp_transfer::transport::bind_udp;
use tracing::info;

/// Receives a single transfer and writes it to stdout
#[derive(Parser)]
struct Args {
    #[clap(long, default_value = "0.0.0.0:0")]
    bind: String,

    #[clap(flatten)]
    common: CommonArgs,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    args.common.init_logging();

    let socket = bind_udp(&args.bind).await?;
    let defaults = if socket.local_addr()?.is_ipv4() { TransferConfig::default_ipv4() } else { TransferConfig::default_ipv6() };
    let config = Arc::new(args.common.to_config(defaults)?);

    let receiver = Receiver::new(config, socket)?;
    info!("[bound] {}", receiver.local_addr()?.port());
    let summary = receiver.receive_into(tokio::io::stdout()).await?;
    info!("received {} datagrams ({:?})", summary.stats.num_accepted, summary.reason);
    Ok(())
}
