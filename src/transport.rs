use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, info, trace};

/// This is an abstraction for sending and receiving discrete datagrams, introduced to decouple
///  the protocol from the actual socket for testing.
///
/// Errors are fatal to the run using the socket - there is no retry at this level.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    async fn send_to(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()>;

    /// Receives a single datagram, returning its length and its origin
    async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)>;

    fn local_addr(&self) -> anyhow::Result<SocketAddr>;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send_to(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        trace!("UDP socket: sending {} bytes to {:?}", buf.len(), to);

        let num_written = UdpSocket::send_to(self, buf, to).await?;
        if num_written != buf.len() {
            bail!("short write to {:?}: {} of {} bytes", to, num_written, buf.len());
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        Ok(UdpSocket::recv_from(self, buf).await?)
    }

    fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(UdpSocket::local_addr(self)?)
    }
}

pub async fn bind_udp(addr: &str) -> anyhow::Result<Arc<UdpSocket>> {
    let socket = UdpSocket::bind(addr).await?;
    info!("bound UDP socket to {:?}", socket.local_addr()?);
    Ok(Arc::new(socket))
}

/// Resolves `<host>:<port>`, preferring IPV4 addresses if the host has several
pub async fn resolve(addr: &str) -> anyhow::Result<SocketAddr> {
    let candidates = lookup_host(addr).await?
        .collect::<Vec<_>>();
    debug!("{} resolves to {:?}", addr, candidates);

    candidates.iter()
        .find(|a| a.is_ipv4())
        .or_else(|| candidates.first())
        .cloned()
        .ok_or_else(|| anyhow!("{} does not resolve to any address", addr))
}

/// The wildcard address of the same IP version as `peer`, with an ephemeral port
pub fn ephemeral_addr_for(peer: SocketAddr) -> &'static str {
    if peer.is_ipv4() {
        "0.0.0.0:0"
    }
    else {
        "[::]:0"
    }
}
