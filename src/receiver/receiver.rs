use std::net::SocketAddr;
use std::ops::Range;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::{select, try_join};
use tracing::{debug, info, trace, warn};

use crate::compression::decompress;
use crate::config::TransferConfig;
use crate::packet::ack::Ack;
use crate::receiver::reassembly::{Acceptance, CompletedTransfer, CompletionReason, Reassembly, ReassemblyStats};
use crate::transport::DatagramSocket;
use crate::util::timer::Deadline;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReceiveSummary {
    pub reason: CompletionReason,
    pub stats: ReassemblyStats,
    pub num_acks_sent: usize,
    pub num_compressed_bytes: usize,
    pub gaps: Vec<Range<u64>>,
}

#[derive(Debug)]
pub struct ReceivedTransfer {
    pub data: Vec<u8>,
    pub summary: ReceiveSummary,
}

/// Context for receiving a single payload. The run has three concurrent loops: the read loop
///  forwards everything arriving on the socket, the detector loop owns the [Reassembly] and the
///  inactivity watchdog, and the ack loop writes acks back to the origin of each datagram.
///
/// The run ends when the detector loop completes and all pending acks are written, or with the
///  first transport error.
pub struct Receiver {
    config: Arc<TransferConfig>,
    socket: Arc<dyn DatagramSocket>,
}

impl Receiver {
    pub fn new(config: Arc<TransferConfig>, socket: Arc<dyn DatagramSocket>) -> anyhow::Result<Receiver> {
        config.validate()?;
        Ok(Receiver {
            config,
            socket,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Writes the received data to `sink` in one piece after completion - nothing is written
    ///  if the transfer fails
    pub async fn receive_into(&self, mut sink: impl AsyncWrite + Unpin) -> anyhow::Result<ReceiveSummary> {
        let received = self.receive().await?;

        sink.write_all(&received.data).await
            .context("error writing output")?;
        sink.flush().await
            .context("error writing output")?;
        Ok(received.summary)
    }

    pub async fn receive(&self) -> anyhow::Result<ReceivedTransfer> {
        let (inbound_send, inbound_recv) = mpsc::channel(self.config.queue_capacity);
        let (ack_send, ack_recv) = mpsc::channel(self.config.queue_capacity);

        // NB: the read loop only terminates with an error
        let ((completed, stats), num_acks_sent) = select! {
            result = async { try_join!(self.detector_loop(inbound_recv, ack_send), self.ack_loop(ack_recv)) } => result?,
            Err(e) = self.read_loop(inbound_send) => return Err(e),
        };

        for gap in &completed.gaps {
            warn!("bytes {}..{} were never received - output will be incomplete", gap.start, gap.end);
        }

        let data = if completed.data.is_empty() {
            debug!("nothing was received");
            Vec::new()
        }
        else {
            decompress(&completed.data)?
        };

        let summary = ReceiveSummary {
            reason: completed.reason,
            stats,
            num_acks_sent,
            num_compressed_bytes: completed.data.len(),
            gaps: completed.gaps,
        };
        info!("[completed] {} bytes ({} compressed): {:?}", data.len(), summary.num_compressed_bytes, summary);

        Ok(ReceivedTransfer {
            data,
            summary,
        })
    }

    async fn read_loop(&self, inbound: mpsc::Sender<(Bytes, SocketAddr)>) -> anyhow::Result<()> {
        let mut buf = vec![0u8; TransferConfig::MAX_UDP_PAYLOAD];
        loop {
            let (num_read, from) = self.socket.recv_from(&mut buf).await
                .context("error receiving datagram")?;
            trace!("received {} bytes from {:?}", num_read, from);

            if inbound.send((Bytes::copy_from_slice(&buf[..num_read]), from)).await.is_err() {
                trace!("detector loop is done - ignoring datagram");
            }
        }
    }

    async fn detector_loop(&self, mut inbound: mpsc::Receiver<(Bytes, SocketAddr)>, acks: mpsc::Sender<(Ack, SocketAddr)>) -> anyhow::Result<(CompletedTransfer, ReassemblyStats)> {
        let mut reassembly = Reassembly::new();
        let mut watchdog = Deadline::after(self.config.inactivity_timeout);

        loop {
            select! {
                Some((buf, from)) = inbound.recv() => {
                    let (ack, num_repeats) = match reassembly.on_packet(&buf) {
                        Acceptance::Accepted(ack) => {
                            watchdog.reset();
                            (ack, 1)
                        }
                        Acceptance::Duplicate(ack) => (ack, 1),
                        Acceptance::Terminal(ack) => (ack, self.config.fin_ack_repeats),
                        _ => continue,
                    };

                    for _ in 0..num_repeats {
                        acks.send((ack, from)).await
                            .map_err(|_| anyhow!("ack loop terminated"))?;
                    }
                }
                _ = watchdog.expired() => {
                    debug!("no new data for {:?}", watchdog.timeout());
                    reassembly.on_inactivity();
                }
            }

            if let Some(completed) = reassembly.take_completed() {
                return Ok((completed, reassembly.stats().clone()));
            }
        }
    }

    async fn ack_loop(&self, mut acks: mpsc::Receiver<(Ack, SocketAddr)>) -> anyhow::Result<usize> {
        let mut num_sent = 0;
        while let Some((ack, to)) = acks.recv().await {
            trace!("[send ack] {} (offset {}) to {:?}", ack.sequence_id, ack.offset, to);
            self.socket.send_to(to, &ack.to_bytes()).await
                .with_context(|| format!("error sending ack to {:?}", to))?;
            num_sent += 1;
        }
        Ok(num_sent)
    }
}
