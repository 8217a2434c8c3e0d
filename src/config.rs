use std::time::Duration;

use anyhow::bail;

use crate::packet::datagram::Datagram;

#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// This is the size of a complete datagram (header and payload) inside a UDP packet. The
    ///  protocol never relies on IP fragmentation, so this size must be supported by all network
    ///  connections between sender and receiver.
    ///
    /// With full Ethernet frames and no optional IP headers, this is `1500 - 20 - 8 = 1472`
    ///  for IPV4 and `1500 - 40 - 8 = 1452` for IPV6.
    pub max_datagram_size: usize,

    /// The sender re-submits every unacknowledged datagram at this interval. There is no RTT
    ///  estimation, so this should be comfortably larger than the expected round trip time.
    pub retry_interval: Duration,

    /// Optional pause after each datagram written to the socket
    pub send_delay: Option<Duration>,

    /// Once all data is acknowledged, the terminal datagram is re-sent at this interval ...
    pub fin_retry_interval: Duration,
    /// ... until this grace period has passed. The sender does not wait for an ack of the
    ///  terminal datagram.
    pub fin_grace_period: Duration,

    /// The receiver completes with whatever data it has if no new datagram is accepted for this
    ///  long
    pub inactivity_timeout: Duration,

    /// Number of acks the receiver sends in reply to a terminal datagram
    pub fin_ack_repeats: usize,

    /// Capacity of the bounded queues between an endpoint's tasks (number of packets)
    pub queue_capacity: usize,

    /// zstd compression level for the sender
    pub compression_level: i32,

    /// First sequence id used by the sender - chosen at random if `None`
    pub initial_sequence_id: Option<u32>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig::default_ipv4()
    }
}

impl TransferConfig {
    /// The largest UDP payload the protocol allows
    pub const MAX_UDP_PAYLOAD: usize = 65507;

    pub fn default_ipv4() -> TransferConfig {
        TransferConfig {
            max_datagram_size: 1472,
            retry_interval: Duration::from_millis(1500),
            send_delay: None,
            fin_retry_interval: Duration::from_millis(100),
            fin_grace_period: Duration::from_millis(1000),
            inactivity_timeout: Duration::from_millis(6000),
            fin_ack_repeats: 5,
            queue_capacity: 4096,
            compression_level: 19,
            initial_sequence_id: None,
        }
    }

    pub fn default_ipv6() -> TransferConfig {
        TransferConfig {
            max_datagram_size: 1452,
            ..TransferConfig::default_ipv4()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_datagram_size <= Datagram::HEADER_SIZE {
            bail!("max datagram size {} leaves no room for payload after the {} byte header", self.max_datagram_size, Datagram::HEADER_SIZE);
        }
        if self.max_datagram_size > Self::MAX_UDP_PAYLOAD {
            bail!("max datagram size {} exceeds the maximum UDP payload of {}", self.max_datagram_size, Self::MAX_UDP_PAYLOAD);
        }
        if self.retry_interval.is_zero() || self.fin_retry_interval.is_zero() {
            bail!("retry intervals must be positive");
        }
        if self.inactivity_timeout.is_zero() {
            bail!("inactivity timeout must be positive");
        }
        if self.fin_ack_repeats == 0 {
            bail!("the terminal datagram must be acknowledged at least once");
        }
        if self.queue_capacity == 0 {
            bail!("queue capacity must be positive");
        }
        if !(1..=22).contains(&self.compression_level) {
            bail!("compression level {} is outside the range 1..=22", self.compression_level);
        }

        Ok(())
    }

    /// Number of payload bytes that fit into a single datagram
    pub fn payload_capacity(&self) -> usize {
        self.max_datagram_size.saturating_sub(Datagram::HEADER_SIZE)
    }
}
