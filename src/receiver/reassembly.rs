use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::ops::Range;

use tracing::{debug, info, trace};

use crate::packet::ack::Ack;
use crate::packet::datagram::{decode, Datagram};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CompletionReason {
    TerminalDatagram,
    Inactivity,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReceiverState {
    Receiving,
    Complete(CompletionReason),
}

/// What happened to a single inbound datagram, and which ack (if any) it calls for
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Acceptance {
    /// new data, stored
    Accepted(Ack),
    /// data at an offset that was accepted before - acknowledged again, but not stored
    Duplicate(Ack),
    Terminal(Ack),
    Corrupt,
    Malformed,
    IgnoredAfterCompletion,
}

impl Acceptance {
    pub fn ack(&self) -> Option<Ack> {
        match self {
            Acceptance::Accepted(ack) | Acceptance::Duplicate(ack) | Acceptance::Terminal(ack) => Some(*ack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ReassemblyStats {
    pub num_accepted: usize,
    pub num_duplicates: usize,
    pub num_corrupt: usize,
    pub num_malformed: usize,
}

/// The reassembled (still compressed) payload of a completed transfer
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CompletedTransfer {
    pub reason: CompletionReason,
    pub data: Vec<u8>,
    /// byte ranges of `data` that were never received; these are zero-filled
    pub gaps: Vec<Range<u64>>,
}

/// Collects accepted datagrams, keyed by offset. This is the receiver's state machine with no
///  I/O or timing of its own: the caller feeds it datagrams and tells it when the inactivity
///  watchdog fires.
pub struct Reassembly {
    state: ReceiverState,
    accepted: BTreeMap<u32, Datagram>,
    stats: ReassemblyStats,
    delivered: bool,
}

impl Default for Reassembly {
    fn default() -> Self {
        Reassembly::new()
    }
}

impl Reassembly {
    pub fn new() -> Reassembly {
        Reassembly {
            state: ReceiverState::Receiving,
            accepted: BTreeMap::new(),
            stats: ReassemblyStats::default(),
            delivered: false,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn stats(&self) -> &ReassemblyStats {
        &self.stats
    }

    pub fn num_accepted(&self) -> usize {
        self.accepted.len()
    }

    pub fn on_packet(&mut self, buf: &[u8]) -> Acceptance {
        match decode(buf) {
            Ok(datagram) => self.on_datagram(datagram),
            Err(e) => {
                debug!("[recv malformed packet] {} bytes: {}", buf.len(), e);
                self.stats.num_malformed += 1;
                Acceptance::Malformed
            }
        }
    }

    pub fn on_datagram(&mut self, datagram: Datagram) -> Acceptance {
        if let ReceiverState::Complete(_) = self.state {
            trace!("received {:?} after completion - ignoring", datagram);
            return Acceptance::IgnoredAfterCompletion;
        }

        if !datagram.is_valid() {
            debug!("[recv corrupt packet] {:?}", datagram);
            self.stats.num_corrupt += 1;
            return Acceptance::Corrupt;
        }

        if datagram.offset as u64 + datagram.payload_len() as u64 > u32::MAX as u64 {
            debug!("[recv malformed packet] {:?} extends beyond the offset range", datagram);
            self.stats.num_malformed += 1;
            return Acceptance::Malformed;
        }

        let ack = Ack::for_datagram(&datagram);

        if datagram.done {
            info!("received terminal datagram {} - completing with {} datagrams", datagram.sequence_id, self.accepted.len());
            self.state = ReceiverState::Complete(CompletionReason::TerminalDatagram);
            return Acceptance::Terminal(ack);
        }

        match self.accepted.entry(datagram.offset) {
            Entry::Vacant(e) => {
                trace!("[recv data] {:?} ACCEPTED", datagram);
                e.insert(datagram);
                self.stats.num_accepted += 1;
                Acceptance::Accepted(ack)
            }
            Entry::Occupied(_) => {
                trace!("[recv data] {:?} IGNORED", datagram);
                self.stats.num_duplicates += 1;
                Acceptance::Duplicate(ack)
            }
        }
    }

    pub fn on_inactivity(&mut self) {
        if self.state == ReceiverState::Receiving {
            info!("no new data - completing with {} datagrams", self.accepted.len());
            self.state = ReceiverState::Complete(CompletionReason::Inactivity);
        }
    }

    /// Returns the reassembled data once after completion, `None` before completion and on
    ///  subsequent calls
    pub fn take_completed(&mut self) -> Option<CompletedTransfer> {
        let reason = match self.state {
            ReceiverState::Complete(reason) if !self.delivered => reason,
            _ => return None,
        };
        self.delivered = true;

        let accepted = std::mem::take(&mut self.accepted);

        let len = accepted.values()
            .map(|d| d.offset as u64 + d.payload_len() as u64)
            .max()
            .unwrap_or(0);

        // NB: on_datagram keeps every end within the u32 offset range, so this fits any usize
        let mut data = vec![0u8; len as usize];
        let mut gaps = Vec::new();
        let mut expected_offset = 0u64;
        for datagram in accepted.values() {
            let offset = datagram.offset as u64;
            if offset > expected_offset {
                gaps.push(expected_offset..offset);
            }
            let start = offset as usize;
            data[start..start + datagram.payload_len()].copy_from_slice(&datagram.payload);
            expected_offset = expected_offset.max(offset + datagram.payload_len() as u64);
        }

        Some(CompletedTransfer {
            reason,
            data,
            gaps,
        })
    }
}


#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rstest::rstest;
    use crate::packet::datagram::{encode, Checksum};
    use super::*;

    fn data(sequence_id: u32, offset: u32, payload: &'static [u8]) -> Datagram {
        Datagram::new(sequence_id, offset, Bytes::from_static(payload), false)
    }

    #[test]
    fn test_idempotent_acceptance() {
        let mut reassembly = Reassembly::new();
        let datagram = data(1, 0, b"abc");

        assert_eq!(reassembly.on_datagram(datagram.clone()), Acceptance::Accepted(Ack { sequence_id: 1, offset: 0 }));
        for _ in 0..4 {
            assert_eq!(reassembly.on_datagram(datagram.clone()), Acceptance::Duplicate(Ack { sequence_id: 1, offset: 0 }));
        }

        assert_eq!(reassembly.num_accepted(), 1);
        assert_eq!(reassembly.stats().num_accepted, 1);
        assert_eq!(reassembly.stats().num_duplicates, 4);
        assert_eq!(reassembly.state(), ReceiverState::Receiving);
    }

    #[rstest]
    #[case(vec![0, 1, 2])]
    #[case(vec![0, 2, 1])]
    #[case(vec![1, 0, 2])]
    #[case(vec![1, 2, 0])]
    #[case(vec![2, 0, 1])]
    #[case(vec![2, 1, 0])]
    fn test_reassembly_order(#[case] order: Vec<usize>) {
        let datagrams = [data(1, 0, b"abcde"), data(2, 5, b"fghij"), data(3, 10, b"klmno")];

        let mut reassembly = Reassembly::new();
        for idx in order {
            assert!(matches!(reassembly.on_datagram(datagrams[idx].clone()), Acceptance::Accepted(_)));
        }
        reassembly.on_datagram(Datagram::terminal(4));

        let completed = reassembly.take_completed().unwrap();
        assert_eq!(completed.data, b"abcdefghijklmno");
        assert_eq!(completed.reason, CompletionReason::TerminalDatagram);
        assert!(completed.gaps.is_empty());
    }

    #[test]
    fn test_terminal_completes_despite_gaps() {
        let mut reassembly = Reassembly::new();
        reassembly.on_datagram(data(1, 0, b"abcde"));
        reassembly.on_datagram(data(3, 10, b"klm"));

        assert_eq!(reassembly.on_datagram(Datagram::terminal(4)), Acceptance::Terminal(Ack { sequence_id: 4, offset: 0 }));
        assert_eq!(reassembly.state(), ReceiverState::Complete(CompletionReason::TerminalDatagram));

        let completed = reassembly.take_completed().unwrap();
        assert_eq!(completed.data, b"abcde\0\0\0\0\0klm");
        assert_eq!(completed.gaps, vec![5..10]);
    }

    #[test]
    fn test_leading_gap() {
        let mut reassembly = Reassembly::new();
        reassembly.on_datagram(data(2, 5, b"fghij"));
        reassembly.on_inactivity();

        let completed = reassembly.take_completed().unwrap();
        assert_eq!(completed.data.len(), 10);
        assert_eq!(completed.gaps, vec![0..5]);
        assert_eq!(completed.reason, CompletionReason::Inactivity);
    }

    #[test]
    fn test_corrupt_datagram_is_dropped() {
        let mut reassembly = Reassembly::new();

        let mut corrupt = data(1, 0, b"abc");
        corrupt.checksum = Checksum::of(b"abd");
        assert_eq!(reassembly.on_datagram(corrupt), Acceptance::Corrupt);

        // a corrupt terminal datagram must not complete the transfer
        let mut corrupt_terminal = Datagram::terminal(2);
        corrupt_terminal.checksum = Checksum::of(b"x");
        assert_eq!(reassembly.on_datagram(corrupt_terminal), Acceptance::Corrupt);

        assert_eq!(reassembly.state(), ReceiverState::Receiving);
        assert_eq!(reassembly.num_accepted(), 0);
        assert_eq!(reassembly.stats().num_corrupt, 2);
        assert_eq!(Acceptance::Corrupt.ack(), None);
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::ack_sized(vec![0, 0, 0, 1, 0, 0, 0, 0])]
    #[case::truncated(encode(1, 0, b"abc", false)[..38].to_vec())]
    fn test_malformed_packet_is_dropped(#[case] buf: Vec<u8>) {
        let mut reassembly = Reassembly::new();
        assert_eq!(reassembly.on_packet(&buf), Acceptance::Malformed);
        assert_eq!(reassembly.stats().num_malformed, 1);
        assert_eq!(reassembly.state(), ReceiverState::Receiving);
    }

    #[test]
    fn test_datagram_beyond_offset_range_is_dropped() {
        let mut reassembly = Reassembly::new();
        assert_eq!(reassembly.on_datagram(data(1, u32::MAX - 1, b"abc")), Acceptance::Malformed);
        assert_eq!(reassembly.stats().num_malformed, 1);

        // ending exactly at the end of the range is fine
        assert!(matches!(reassembly.on_datagram(data(2, u32::MAX - 3, b"abc")), Acceptance::Accepted(_)));
    }

    #[test]
    fn test_on_packet_decodes() {
        let mut reassembly = Reassembly::new();
        assert_eq!(reassembly.on_packet(&encode(7, 0, b"abc", false)), Acceptance::Accepted(Ack { sequence_id: 7, offset: 0 }));
    }

    #[test]
    fn test_ignored_after_completion() {
        let mut reassembly = Reassembly::new();
        reassembly.on_datagram(Datagram::terminal(1));

        assert_eq!(reassembly.on_datagram(data(2, 0, b"abc")), Acceptance::IgnoredAfterCompletion);
        assert_eq!(reassembly.on_datagram(Datagram::terminal(1)), Acceptance::IgnoredAfterCompletion);

        // the first completion reason sticks
        reassembly.on_inactivity();
        assert_eq!(reassembly.state(), ReceiverState::Complete(CompletionReason::TerminalDatagram));
    }

    #[test]
    fn test_take_completed_once() {
        let mut reassembly = Reassembly::new();
        reassembly.on_datagram(data(1, 0, b"abc"));
        assert!(reassembly.take_completed().is_none());

        reassembly.on_inactivity();
        assert_eq!(reassembly.take_completed().unwrap().data, b"abc");
        assert!(reassembly.take_completed().is_none());
    }

    #[test]
    fn test_inactivity_without_data() {
        let mut reassembly = Reassembly::new();
        reassembly.on_inactivity();

        let completed = reassembly.take_completed().unwrap();
        assert!(completed.data.is_empty());
        assert!(completed.gaps.is_empty());
        assert_eq!(completed.reason, CompletionReason::Inactivity);
    }
}
