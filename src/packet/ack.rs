use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::packet::datagram::Datagram;

/// Acknowledges exactly one [Datagram]. Acks carry no checksum: a lost or mangled ack is
///  compensated by the sender's periodic retransmission of the data datagram.
///
/// ```ascii
/// 0: sequence id (u32 BE)
/// 4: offset (u32 BE)
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Ack {
    pub sequence_id: u32,
    pub offset: u32,
}

impl Ack {
    pub const SERIALIZED_SIZE: usize = 2 * std::mem::size_of::<u32>();

    pub fn for_datagram(datagram: &Datagram) -> Ack {
        Ack {
            sequence_id: datagram.sequence_id,
            offset: datagram.offset,
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32(self.sequence_id);
        buf.put_u32(self.offset);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SERIALIZED_SIZE);
        self.ser(&mut buf);
        buf.freeze()
    }

    pub fn try_deser(mut buf: &[u8]) -> anyhow::Result<Ack> {
        if buf.len() != Self::SERIALIZED_SIZE {
            bail!("ack must have exactly {} bytes, was {}", Self::SERIALIZED_SIZE, buf.len());
        }

        Ok(Ack {
            sequence_id: buf.get_u32(),
            offset: buf.get_u32(),
        })
    }
}

pub fn make_ack(datagram: &Datagram) -> Bytes {
    Ack::for_datagram(datagram).to_bytes()
}

pub fn decode_ack(buf: &[u8]) -> anyhow::Result<Ack> {
    Ack::try_deser(buf)
}


#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::zero(0, 0, vec![0,0,0,0, 0,0,0,0])]
    #[case::regular(0x01020304, 1448, vec![1,2,3,4, 0,0,5,0xa8])]
    #[case::max(u32::MAX, u32::MAX, vec![255,255,255,255, 255,255,255,255])]
    fn test_make_ack(#[case] sequence_id: u32, #[case] offset: u32, #[case] expected: Vec<u8>) {
        let datagram = Datagram::new(sequence_id, offset, Bytes::from_static(b"xyz"), false);
        assert_eq!(make_ack(&datagram).to_vec(), expected);
        assert_eq!(decode_ack(&expected).unwrap(), Ack { sequence_id, offset });
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::too_short(vec![0,0,0,1, 0,0,0])]
    #[case::too_long(vec![0,0,0,1, 0,0,0,2, 0])]
    fn test_decode_ack_wrong_size(#[case] buf: Vec<u8>) {
        assert!(decode_ack(&buf).is_err());
    }

    #[test]
    fn test_terminal_ack() {
        let ack = Ack::for_datagram(&Datagram::terminal(5));
        assert_eq!(ack, Ack { sequence_id: 5, offset: 0 });
    }
}
