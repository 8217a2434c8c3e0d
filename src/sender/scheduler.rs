use std::collections::BTreeMap;

use anyhow::bail;
use bytes::Bytes;
use tracing::{debug, info, trace};

use crate::packet::ack::Ack;
use crate::packet::datagram::Datagram;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SenderPhase {
    /// Data datagrams are outstanding and re-sent on every tick
    Sending,
    /// All data is acknowledged, only the terminal datagram is re-sent until the grace period ends
    AwaitingFinAck,
    Done,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AckOutcome {
    Removed,
    /// The ack removed the last outstanding datagram, moving the scheduler to
    ///  [SenderPhase::AwaitingFinAck]
    LastRemoved,
    TerminalAcknowledged,
    Ignored,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SendSummary {
    pub num_datagrams: usize,
    pub num_transmissions: usize,
    pub num_terminal_transmissions: usize,
    pub num_acks: usize,
    pub num_ignored_acks: usize,
}

struct OutstandingDatagram {
    offset: u32,
    encoded: Bytes,
}

/// Splits `compressed` into datagrams of at most `payload_capacity` bytes, numbering them
///  consecutively from `first_sequence_id` (wrapping around). Returns the datagrams and the
///  sequence id after the last one.
pub fn chunk(compressed: &Bytes, payload_capacity: usize, first_sequence_id: u32) -> anyhow::Result<(Vec<Datagram>, u32)> {
    if payload_capacity == 0 {
        bail!("payload capacity must be positive");
    }
    if compressed.len() > u32::MAX as usize {
        bail!("payload of {} bytes exceeds the protocol's offset range", compressed.len());
    }

    let mut result = Vec::with_capacity(compressed.len().div_ceil(payload_capacity));
    let mut sequence_id = first_sequence_id;
    let mut offset = 0;
    while offset < compressed.len() {
        let end = (offset + payload_capacity).min(compressed.len());
        // NB: offset < compressed.len() <= u32::MAX
        result.push(Datagram::new(sequence_id, offset as u32, compressed.slice(offset..end), false));

        sequence_id = sequence_id.wrapping_add(1);
        offset = end;
    }
    Ok((result, sequence_id))
}

/// The sender's retransmission state machine. It owns the set of unacknowledged datagrams and
///  decides what goes on the wire on every tick - the actual timing and I/O live in
///  [crate::sender::sender::Sender].
pub struct RetransmissionScheduler {
    phase: SenderPhase,
    outstanding: BTreeMap<u32, OutstandingDatagram>,
    terminal_sequence_id: u32,
    terminal: Bytes,
    summary: SendSummary,
}

impl RetransmissionScheduler {
    /// `terminal_sequence_id` is the id after the last data datagram
    pub fn new(datagrams: Vec<Datagram>, terminal_sequence_id: u32) -> RetransmissionScheduler {
        let summary = SendSummary {
            num_datagrams: datagrams.len(),
            ..SendSummary::default()
        };

        let outstanding = datagrams.into_iter()
            .map(|d| (d.sequence_id, OutstandingDatagram {
                offset: d.offset,
                encoded: d.to_bytes(),
            }))
            .collect::<BTreeMap<_, _>>();

        let terminal = Datagram::terminal(terminal_sequence_id).to_bytes();

        let phase = if outstanding.is_empty() {
            debug!("nothing to send - going straight to the terminal phase");
            SenderPhase::AwaitingFinAck
        }
        else {
            SenderPhase::Sending
        };

        RetransmissionScheduler {
            phase,
            outstanding,
            terminal_sequence_id,
            terminal,
            summary,
        }
    }

    pub fn phase(&self) -> SenderPhase {
        self.phase
    }

    pub fn num_outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn terminal_sequence_id(&self) -> u32 {
        self.terminal_sequence_id
    }

    pub fn summary(&self) -> &SendSummary {
        &self.summary
    }

    /// Everything that should be (re-)sent on this tick: all outstanding datagrams while sending,
    ///  only the terminal datagram after that
    pub fn on_tick(&mut self) -> Vec<Bytes> {
        match self.phase {
            SenderPhase::Sending => {
                trace!("tick: re-submitting {} outstanding datagrams", self.outstanding.len());
                self.summary.num_transmissions += self.outstanding.len();
                self.outstanding.values()
                    .map(|d| d.encoded.clone())
                    .collect()
            }
            SenderPhase::AwaitingFinAck => {
                trace!("tick: re-submitting terminal datagram {}", self.terminal_sequence_id);
                self.summary.num_terminal_transmissions += 1;
                vec![self.terminal.clone()]
            }
            SenderPhase::Done => vec![],
        }
    }

    pub fn on_ack(&mut self, ack: Ack) -> AckOutcome {
        self.summary.num_acks += 1;

        if self.phase == SenderPhase::Done {
            self.summary.num_ignored_acks += 1;
            return AckOutcome::Ignored;
        }

        if ack.sequence_id == self.terminal_sequence_id && ack.offset == 0 && self.phase == SenderPhase::AwaitingFinAck {
            debug!("terminal datagram {} was acknowledged", ack.sequence_id);
            return AckOutcome::TerminalAcknowledged;
        }

        match self.outstanding.get(&ack.sequence_id) {
            Some(d) if d.offset == ack.offset => {}
            Some(d) => {
                debug!("ack for {} has offset {}, expected {} - ignoring", ack.sequence_id, ack.offset, d.offset);
                self.summary.num_ignored_acks += 1;
                return AckOutcome::Ignored;
            }
            None => {
                trace!("ack for {} which is not outstanding (any more) - ignoring", ack.sequence_id);
                self.summary.num_ignored_acks += 1;
                return AckOutcome::Ignored;
            }
        }

        self.outstanding.remove(&ack.sequence_id);
        trace!("[recv ack] {} (offset {}), {} outstanding", ack.sequence_id, ack.offset, self.outstanding.len());

        if self.outstanding.is_empty() {
            info!("all {} datagrams acknowledged - sending terminal datagram {}", self.summary.num_datagrams, self.terminal_sequence_id);
            self.phase = SenderPhase::AwaitingFinAck;
            AckOutcome::LastRemoved
        }
        else {
            AckOutcome::Removed
        }
    }

    pub fn on_grace_period_elapsed(&mut self) {
        if self.phase == SenderPhase::AwaitingFinAck {
            debug!("terminal grace period elapsed");
            self.phase = SenderPhase::Done;
        }
    }
}
