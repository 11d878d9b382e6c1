use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_varint::try_get_fixed::TryGetFixedSupport;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::seq_num::SeqNum;

/// Wire tag for the two packet kinds. The values are the ASCII characters
///  'D' and 'A' so packet dumps remain readable.
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PacketType {
    Data = b'D',
    Ack = b'A',
}

/// An immutable protocol packet: a DATA packet carrying one segment, or an
///  ACK packet carrying a cumulative acknowledgment value and no payload.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub seq_num: SeqNum,
    pub payload: Bytes,
}

impl Packet {
    pub const HEADER_LEN: usize = 5;

    pub fn data(seq_num: SeqNum, payload: &[u8]) -> Packet {
        Packet {
            packet_type: PacketType::Data,
            seq_num,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    pub fn ack(seq_num: SeqNum) -> Packet {
        Packet {
            packet_type: PacketType::Ack,
            seq_num,
            payload: Bytes::new(),
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.packet_type.into());
        buf.put_u32(self.seq_num.to_raw());
        buf.put_slice(&self.payload);
    }

    /// NB: The decoder puts no upper bound on the payload - the segment size
    ///  cap is the sender's responsibility.
    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Packet> {
        let raw_type = buf.try_get_u8()?;
        let packet_type = match PacketType::try_from(raw_type) {
            Ok(packet_type) => packet_type,
            Err(_) => bail!("unrecognized packet type tag {:#04x}", raw_type),
        };
        let seq_num = SeqNum::from_raw(buf.try_get_u32()?);
        let payload = buf.copy_to_bytes(buf.remaining());

        Ok(Packet {
            packet_type,
            seq_num,
            payload,
        })
    }
}
