use std::fmt::{Debug, Formatter};

use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

use crate::config::TransferConfig;

/// SHA-1 digest over a datagram's payload. It covers *only* the payload, not the header.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Checksum(pub [u8; Checksum::SIZE]);

impl Debug for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl Checksum {
    pub const SIZE: usize = 20;

    pub fn of(payload: &[u8]) -> Checksum {
        let mut digest = [0u8; Checksum::SIZE];
        digest.copy_from_slice(&Sha1::digest(payload));
        Checksum(digest)
    }
}

/// A single protocol unit on the wire. All numbers are big-endian:
///
/// ```ascii
///  0: sequence id (u32)
///  4: offset into the compressed payload stream (u32)
///  8: checksum (20 bytes, SHA-1 over the payload)
/// 28: payload length (u32)
/// 32: done flag (u32, 0 or 1)
/// 36: payload
/// ```
///
/// The payload length is not stored separately - it is the length of `payload`.
#[derive(Clone, Eq, PartialEq)]
pub struct Datagram {
    pub sequence_id: u32,
    pub offset: u32,
    pub checksum: Checksum,
    pub done: bool,
    pub payload: Bytes,
}

impl Debug for Datagram {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Datagram{{seq:{}, offset:{}, len:{}, done:{}, checksum:{:?}}}",
               self.sequence_id, self.offset, self.payload.len(), self.done, self.checksum)
    }
}

impl Datagram {
    pub const HEADER_SIZE: usize = 4 + 4 + Checksum::SIZE + 4 + 4;
    /// the largest payload that fits into a single UDP packet
    pub const MAX_PAYLOAD_SIZE: usize = TransferConfig::MAX_UDP_PAYLOAD - Self::HEADER_SIZE;

    /// NB: The caller is responsible for keeping the payload within the configured capacity
    pub fn new(sequence_id: u32, offset: u32, payload: Bytes, done: bool) -> Datagram {
        Datagram {
            sequence_id,
            offset,
            checksum: Checksum::of(&payload),
            done,
            payload,
        }
    }

    /// The end-of-stream marker: empty payload at offset 0
    pub fn terminal(sequence_id: u32) -> Datagram {
        Datagram::new(sequence_id, 0, Bytes::new(), true)
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    pub fn serialized_len(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len()
    }

    pub fn is_valid(&self) -> bool {
        Checksum::of(&self.payload) == self.checksum
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        debug_assert!(self.payload.len() <= u32::MAX as usize);

        buf.put_u32(self.sequence_id);
        buf.put_u32(self.offset);
        buf.put_slice(&self.checksum.0);
        buf.put_u32(self.payload.len() as u32);
        buf.put_u32(if self.done { 1 } else { 0 });
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.ser(&mut buf);
        buf.freeze()
    }

    /// Parses the header and payload without verifying the checksum - that is [Datagram::is_valid]'s
    ///  job. Bytes after the announced payload length are ignored.
    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Datagram> {
        if buf.remaining() < Self::HEADER_SIZE {
            bail!("datagram of {} bytes is too short for a {} byte header", buf.remaining(), Self::HEADER_SIZE);
        }

        let sequence_id = buf.get_u32();
        let offset = buf.get_u32();
        let mut checksum = [0u8; Checksum::SIZE];
        buf.copy_to_slice(&mut checksum);
        let payload_len = buf.get_u32() as usize;
        let done = match buf.get_u32() {
            0 => false,
            1 => true,
            other => bail!("invalid done flag {}", other),
        };

        if payload_len > Self::MAX_PAYLOAD_SIZE {
            bail!("header announces {} payload bytes, exceeding the maximum of {}", payload_len, Self::MAX_PAYLOAD_SIZE);
        }
        if buf.remaining() < payload_len {
            bail!("header announces {} payload bytes, but only {} are present", payload_len, buf.remaining());
        }
        let payload = buf.copy_to_bytes(payload_len);

        Ok(Datagram {
            sequence_id,
            offset,
            checksum: Checksum(checksum),
            done,
            payload,
        })
    }
}

/// Builds exactly one datagram, computing the checksum over `payload`
pub fn encode(sequence_id: u32, offset: u32, payload: &[u8], done: bool) -> Bytes {
    Datagram::new(sequence_id, offset, Bytes::copy_from_slice(payload), done).to_bytes()
}

pub fn decode(mut buf: &[u8]) -> anyhow::Result<Datagram> {
    Datagram::try_deser(&mut buf)
}

pub fn validate(datagram: &Datagram) -> bool {
    datagram.is_valid()
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    const SHA1_EMPTY: [u8; 20] = [0xda, 0x39, 0xa3, 0xee, 0x5e, 0x6b, 0x4b, 0x0d, 0x32, 0x55, 0xbf, 0xef, 0x95, 0x60, 0x18, 0x90, 0xaf, 0xd8, 0x07, 0x09];
    const SHA1_ABC: [u8; 20] = [0xa9, 0x99, 0x3e, 0x36, 0x47, 0x06, 0x81, 0x6a, 0xba, 0x3e, 0x25, 0x71, 0x78, 0x50, 0xc2, 0x6c, 0x9c, 0xd0, 0xd8, 0x9d];

    fn wire(seq: [u8; 4], offset: [u8; 4], checksum: [u8; 20], len: [u8; 4], done: [u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut result = Vec::new();
        result.extend_from_slice(&seq);
        result.extend_from_slice(&offset);
        result.extend_from_slice(&checksum);
        result.extend_from_slice(&len);
        result.extend_from_slice(&done);
        result.extend_from_slice(payload);
        result
    }

    #[test]
    fn test_header_size() {
        assert_eq!(Datagram::HEADER_SIZE, 36);
    }

    #[rstest]
    #[case::terminal(0x01020304, 0x0a0b0c0d, b"", true, wire([1,2,3,4], [10,11,12,13], SHA1_EMPTY, [0,0,0,0], [0,0,0,1], b""))]
    #[case::data(7, 1448, b"abc", false, wire([0,0,0,7], [0,0,5,0xa8], SHA1_ABC, [0,0,0,3], [0,0,0,0], b"abc"))]
    fn test_encode(#[case] seq: u32, #[case] offset: u32, #[case] payload: &[u8], #[case] done: bool, #[case] expected: Vec<u8>) {
        assert_eq!(encode(seq, offset, payload, done).to_vec(), expected);
    }

    #[rstest]
    #[case::empty(b"")]
    #[case::hello(b"Hello world")]
    #[case::binary(&[0u8, 255, 1, 254, 0, 0, 0])]
    #[case::full_ipv4_capacity(&[0x5a; 1472 - 36])]
    fn test_decode_encoded(#[case] payload: &[u8]) {
        let decoded = decode(&encode(99, 12345, payload, false)).unwrap();

        assert_eq!(decoded.sequence_id, 99);
        assert_eq!(decoded.offset, 12345);
        assert!(!decoded.done);
        assert_eq!(decoded.payload.as_ref(), payload);
        assert!(validate(&decoded));
    }

    #[test]
    fn test_every_payload_bit_flip_is_detected() {
        let encoded = encode(1, 0, b"some payload", false).to_vec();

        for byte_idx in Datagram::HEADER_SIZE..encoded.len() {
            for bit in 0..8 {
                let mut corrupted = encoded.clone();
                corrupted[byte_idx] ^= 1 << bit;
                let decoded = decode(&corrupted).unwrap();
                assert!(!validate(&decoded), "undetected flip of bit {} in byte {}", bit, byte_idx);
            }
        }
    }

    #[test]
    fn test_checksum_field_corruption_is_detected() {
        let mut encoded = encode(1, 0, b"abc", false).to_vec();
        encoded[8] ^= 0x80;
        assert!(!validate(&decode(&encoded).unwrap()));
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::truncated_header(wire([0,0,0,1], [0,0,0,0], SHA1_ABC, [0,0,0,3], [0,0,0,0], b"abc")[..35].to_vec())]
    #[case::invalid_done_flag(wire([0,0,0,1], [0,0,0,0], SHA1_ABC, [0,0,0,3], [0,0,0,2], b"abc"))]
    #[case::truncated_payload(wire([0,0,0,1], [0,0,0,0], SHA1_ABC, [0,0,0,4], [0,0,0,0], b"abc"))]
    #[case::length_beyond_udp_payload(wire([0,0,0,1], [0,0,0,0], SHA1_ABC, [0,0,0xff,0xdc], [0,0,0,0], &[0u8; 65500]))]
    #[case::huge_length(wire([0,0,0,1], [0,0,0,0], SHA1_ABC, [0xff,0xff,0xff,0xff], [0,0,0,0], b"abc"))]
    fn test_decode_malformed(#[case] buf: Vec<u8>) {
        assert!(decode(&buf).is_err());
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let buf = wire([0,0,0,1], [0,0,0,2], SHA1_ABC, [0,0,0,3], [0,0,0,0], b"abcdef");
        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded.payload.as_ref(), b"abc");
        assert!(decoded.is_valid());
    }

    #[test]
    fn test_max_payload_size_is_accepted() {
        let payload = vec![7u8; Datagram::MAX_PAYLOAD_SIZE];
        let encoded = encode(1, 0, &payload, false);
        assert_eq!(encoded.len(), TransferConfig::MAX_UDP_PAYLOAD);
        assert_eq!(decode(&encoded).unwrap().payload_len(), Datagram::MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_terminal() {
        let terminal = Datagram::terminal(17);
        assert_eq!(terminal.sequence_id, 17);
        assert_eq!(terminal.offset, 0);
        assert!(terminal.done);
        assert!(terminal.payload.is_empty());
        assert_eq!(terminal.checksum, Checksum(SHA1_EMPTY));
    }

    #[test]
    fn test_checksum_debug_is_hex() {
        assert_eq!(format!("{:?}", Checksum(SHA1_ABC)), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }
}
