// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The four QoS handshake packets that carry nothing but a packet identifier:
//! PUBACK (QoS 1), and PUBREC/PUBREL/PUBCOMP (the QoS 2 four-step handshake).

use crate::base::PacketId;
use crate::byte_array::{write_u16, ByteArray};
use crate::error::{DecodeError, EncodeError};

macro_rules! packet_id_only_packet {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, Eq, PartialEq)]
        pub struct $name {
            pub packet_id: PacketId,
        }

        impl $name {
            #[must_use]
            pub const fn new(packet_id: PacketId) -> Self {
                Self { packet_id }
            }

            pub fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
                let packet_id = ba.read_u16()?;
                if packet_id == 0 {
                    return Err(DecodeError::InvalidPacketId);
                }
                Ok(Self { packet_id })
            }

            pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
                write_u16(buf, self.packet_id);
                Ok(())
            }
        }
    };
}

packet_id_only_packet!(PublishAckPacket, "PUBACK, response to a QoS 1 PUBLISH.");
packet_id_only_packet!(
    PublishReceivedPacket,
    "PUBREC, first response to a QoS 2 PUBLISH."
);
packet_id_only_packet!(
    PublishReleasePacket,
    "PUBREL, response to PUBREC; releases the stored packet identifier."
);
packet_id_only_packet!(
    PublishCompletePacket,
    "PUBCOMP, response to PUBREL; completes the QoS 2 handshake."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let packet = PublishAckPacket::new(7);
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(PublishAckPacket::decode(&mut ba).unwrap(), packet);
    }

    #[test]
    fn rejects_zero_packet_id() {
        let buf = [0u8, 0u8];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(PublishReceivedPacket::decode(&mut ba), Err(DecodeError::InvalidPacketId));
    }
}
