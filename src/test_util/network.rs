use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::trace;

use crate::packet::ack::Ack;
use crate::packet::datagram::{Checksum, Datagram};
use crate::transport::DatagramSocket;

/// Fault probabilities in percent, applied independently to every datagram
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    pub drop_percent: u32,
    pub duplicate_percent: u32,
    /// only applies to data datagrams, flipping a bit in the payload (or the checksum if the
    ///  payload is empty)
    pub corrupt_percent: u32,
    /// holds a datagram back until after the next one is delivered
    pub reorder_percent: u32,
}

impl FaultConfig {
    pub fn lossy() -> FaultConfig {
        FaultConfig {
            drop_percent: 20,
            duplicate_percent: 10,
            corrupt_percent: 10,
            reorder_percent: 20,
        }
    }
}

type Inbox = mpsc::UnboundedSender<(Bytes, SocketAddr)>;

struct NetworkInner {
    faults: FaultConfig,
    next_port: u16,
    inboxes: FxHashMap<SocketAddr, Inbox>,
    held_back: Option<(SocketAddr, Bytes, SocketAddr)>,
}

impl NetworkInner {
    fn deliver(&self, to: SocketAddr, buf: Bytes, from: SocketAddr) {
        match self.inboxes.get(&to) {
            Some(inbox) => {
                let _ = inbox.send((buf, from));
            }
            None => trace!("no socket bound to {:?} - dropping datagram", to),
        }
    }
}

fn roll(percent: u32) -> bool {
    percent > 0 && rand::random::<u32>() % 100 < percent
}

fn corrupt(buf: &[u8]) -> Bytes {
    let mut result = BytesMut::from(buf);
    let idx = if buf.len() > Datagram::HEADER_SIZE {
        Datagram::HEADER_SIZE + rand::random::<usize>() % (buf.len() - Datagram::HEADER_SIZE)
    }
    else {
        // seq and offset come first, then the checksum
        8 + rand::random::<usize>() % Checksum::SIZE
    };
    result[idx] ^= 0x01;
    result.freeze()
}

/// An in-memory network of [MemorySocket]s. Sockets get distinct loopback addresses, and
///  datagrams to addresses without a socket are silently lost.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        MemoryNetwork::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> MemoryNetwork {
        Self::with_faults(FaultConfig::default())
    }

    pub fn with_faults(faults: FaultConfig) -> MemoryNetwork {
        MemoryNetwork {
            inner: Arc::new(Mutex::new(NetworkInner {
                faults,
                next_port: 10_000,
                inboxes: FxHashMap::default(),
                held_back: None,
            })),
        }
    }

    pub fn bind(&self) -> Arc<MemorySocket> {
        let mut inner = self.inner.lock().unwrap();
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, inner.next_port));
        inner.next_port += 1;

        let (send, recv) = mpsc::unbounded_channel();
        inner.inboxes.insert(addr, send);

        Arc::new(MemorySocket {
            network: self.inner.clone(),
            addr,
            inbox: tokio::sync::Mutex::new(recv),
            fail_sends: AtomicBool::new(false),
            num_sent: AtomicUsize::new(0),
        })
    }
}

pub struct MemorySocket {
    network: Arc<Mutex<NetworkInner>>,
    addr: SocketAddr,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Bytes, SocketAddr)>>,
    fail_sends: AtomicBool,
    num_sent: AtomicUsize,
}

impl MemorySocket {
    /// All subsequent calls to `send_to` fail
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::Release);
    }

    /// number of successful `send_to` calls, regardless of faults
    pub fn num_sent(&self) -> usize {
        self.num_sent.load(Ordering::Acquire)
    }
}

#[async_trait]
impl DatagramSocket for MemorySocket {
    async fn send_to(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        if self.fail_sends.load(Ordering::Acquire) {
            bail!("simulated send failure");
        }
        self.num_sent.fetch_add(1, Ordering::AcqRel);

        let mut inner = self.network.lock().unwrap();
        let faults = inner.faults.clone();

        if roll(faults.drop_percent) {
            trace!("dropping {} bytes from {:?} to {:?}", buf.len(), self.addr, to);
            return Ok(());
        }

        let buf = if buf.len() > Ack::SERIALIZED_SIZE && roll(faults.corrupt_percent) {
            trace!("corrupting {} bytes from {:?} to {:?}", buf.len(), self.addr, to);
            corrupt(buf)
        }
        else {
            Bytes::copy_from_slice(buf)
        };

        if inner.held_back.is_none() && roll(faults.reorder_percent) {
            trace!("holding back {} bytes from {:?} to {:?}", buf.len(), self.addr, to);
            inner.held_back = Some((to, buf, self.addr));
            return Ok(());
        }

        inner.deliver(to, buf.clone(), self.addr);
        if roll(faults.duplicate_percent) {
            inner.deliver(to, buf, self.addr);
        }
        if let Some((held_to, held_buf, held_from)) = inner.held_back.take() {
            inner.deliver(held_to, held_buf, held_from);
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        let mut inbox = self.inbox.lock().await;
        match inbox.recv().await {
            Some((data, from)) => {
                // truncated like a real UDP socket would
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok((len, from))
            }
            None => bail!("network was shut down"),
        }
    }

    fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.addr)
    }
}


#[cfg(test)]
mod tests {
    use crate::packet::datagram::{decode, encode, validate};
    use super::*;

    #[tokio::test]
    async fn test_delivery() {
        let network = MemoryNetwork::new();
        let a = network.bind();
        let b = network.bind();
        assert_ne!(a.local_addr().unwrap(), b.local_addr().unwrap());

        a.send_to(b.local_addr().unwrap(), b"hi").await.unwrap();

        let mut buf = [0u8; 8];
        let (n, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hi");
        assert_eq!(from, a.local_addr().unwrap());
        assert_eq!(a.num_sent(), 1);
    }

    #[tokio::test]
    async fn test_corruption_is_detectable() {
        let network = MemoryNetwork::with_faults(FaultConfig {
            corrupt_percent: 100,
            ..FaultConfig::default()
        });
        let a = network.bind();
        let b = network.bind();

        for payload in [&b""[..], &b"abc"[..]] {
            a.send_to(b.local_addr().unwrap(), &encode(1, 0, payload, false)).await.unwrap();

            let mut buf = [0u8; 64];
            let (n, _) = b.recv_from(&mut buf).await.unwrap();
            assert!(!validate(&decode(&buf[..n]).unwrap()));
        }
    }

    #[tokio::test]
    async fn test_send_failure() {
        let network = MemoryNetwork::new();
        let a = network.bind();
        a.fail_sends();
        assert!(a.send_to(SocketAddr::from(([127, 0, 0, 1], 1)), b"x").await.is_err());
    }
}
