//! Wire formats of the two kinds of packets exchanged between sender and receiver: data
//!  [datagram::Datagram]s flowing from sender to receiver, and [ack::Ack]s flowing back.
//!
//! Both formats are big-endian and have fixed-size headers. The protocol is closed between the
//!  two endpoints of a single run, so there is no version field.

pub mod ack;
pub mod datagram;
