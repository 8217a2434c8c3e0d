use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, trace};

use crate::compression::compress;
use crate::config::TransferConfig;
use crate::packet::ack::Ack;
use crate::sender::scheduler::{chunk, AckOutcome, RetransmissionScheduler, SendSummary, SenderPhase};
use crate::transport::DatagramSocket;
use crate::util::random::{initial_sequence_id, RngRandom};
use crate::util::timer::{expiry, Deadline, RetryTicker};

/// Context for sending a single payload to a receiver. A run consists of three concurrent
///  loops:
/// * the scheduler loop owns the [RetransmissionScheduler], submitting datagrams on every tick
///    and applying acks
/// * the send loop drains the bounded send queue, one socket write per datagram
/// * the ack loop reads and decodes acks from the socket, forwarding them to the scheduler
///
/// The run ends when the scheduler reaches [SenderPhase::Done], or with the first transport error.
pub struct Sender {
    config: Arc<TransferConfig>,
    socket: Arc<dyn DatagramSocket>,
    peer_addr: SocketAddr,
}

impl Sender {
    pub fn new(config: Arc<TransferConfig>, socket: Arc<dyn DatagramSocket>, peer_addr: SocketAddr) -> anyhow::Result<Sender> {
        config.validate()?;
        Ok(Sender {
            config,
            socket,
            peer_addr,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Reads the source to its end before sending anything
    pub async fn send_from(&self, mut source: impl AsyncRead + Unpin) -> anyhow::Result<SendSummary> {
        let mut data = Vec::new();
        source.read_to_end(&mut data).await
            .context("error reading input")?;
        debug!("read {} bytes of input", data.len());

        self.send(&data).await
    }

    pub async fn send(&self, data: &[u8]) -> anyhow::Result<SendSummary> {
        let compressed = Bytes::from(compress(data, self.config.compression_level)?);

        let first_sequence_id = initial_sequence_id::<RngRandom>(self.config.initial_sequence_id);
        let (datagrams, terminal_sequence_id) = chunk(&compressed, self.config.payload_capacity(), first_sequence_id)?;
        info!("sending {} bytes ({} compressed) to {:?} in {} datagrams, starting at sequence id {}",
            data.len(), compressed.len(), self.peer_addr, datagrams.len(), first_sequence_id);

        let scheduler = RetransmissionScheduler::new(datagrams, terminal_sequence_id);
        debug!("terminal datagram will have sequence id {}", scheduler.terminal_sequence_id());

        let (queue_send, queue_recv) = mpsc::channel(self.config.queue_capacity);
        let (ack_send, ack_recv) = mpsc::channel(self.config.queue_capacity);

        // NB: send and ack loops only terminate on their own with an error
        let summary = select! {
            result = self.schedule_loop(scheduler, queue_send, ack_recv) => result?,
            Err(e) = self.send_loop(queue_recv) => return Err(e),
            Err(e) = self.ack_loop(ack_send) => return Err(e),
        };

        info!("[completed] {:?}", summary);
        Ok(summary)
    }

    async fn schedule_loop(&self, mut scheduler: RetransmissionScheduler, queue: mpsc::Sender<Bytes>, mut acks: mpsc::Receiver<Ack>) -> anyhow::Result<SendSummary> {
        let mut ticker = RetryTicker::new(self.config.retry_interval);
        let mut grace_period = None;

        if scheduler.phase() == SenderPhase::AwaitingFinAck {
            ticker.replace(self.config.fin_retry_interval);
            grace_period = Some(Deadline::after(self.config.fin_grace_period));
        }

        loop {
            select! {
                _ = ticker.tick() => {
                    for buf in scheduler.on_tick() {
                        queue.send(buf).await
                            .map_err(|_| anyhow!("send loop terminated"))?;
                    }
                }
                Some(ack) = acks.recv() => {
                    if scheduler.on_ack(ack) == AckOutcome::LastRemoved {
                        ticker.replace(self.config.fin_retry_interval);
                        grace_period = Some(Deadline::after(self.config.fin_grace_period));
                    }
                }
                _ = expiry(grace_period.as_ref()) => {
                    scheduler.on_grace_period_elapsed();
                }
            }

            if scheduler.phase() == SenderPhase::Done {
                return Ok(scheduler.summary().clone());
            }
        }
    }

    async fn send_loop(&self, mut queue: mpsc::Receiver<Bytes>) -> anyhow::Result<()> {
        while let Some(buf) = queue.recv().await {
            trace!("[send data] {} bytes", buf.len());
            self.socket.send_to(self.peer_addr, &buf).await
                .with_context(|| format!("error sending datagram to {:?}", self.peer_addr))?;

            if let Some(delay) = self.config.send_delay {
                sleep(delay).await;
            }
        }
        Ok(())
    }

    async fn ack_loop(&self, acks: mpsc::Sender<Ack>) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.config.max_datagram_size];
        loop {
            let (num_read, from) = self.socket.recv_from(&mut buf).await
                .context("error receiving ack")?;

            if from != self.peer_addr {
                debug!("received {} bytes from unexpected address {:?} - dropping", num_read, from);
                continue;
            }

            match Ack::try_deser(&buf[..num_read]) {
                Ok(ack) => {
                    if acks.send(ack).await.is_err() {
                        return Ok(());
                    }
                }
                Err(e) => {
                    debug!("malformed ack from {:?} - dropping: {}", from, e);
                }
            }
        }
    }
}
