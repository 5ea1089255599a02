// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::base::{PacketId, QoS};
use crate::byte_array::{write_string, write_u16, ByteArray};
use crate::error::{DecodeError, EncodeError};
use crate::topic::TopicName;

/// PUBLISH, used to transport application messages in both directions
/// (MQTT-3.3). `packet_id` is meaningful only for QoS 1/2 (MQTT-3.3.2.2).
#[derive(Clone, Debug, PartialEq)]
pub struct PublishPacket {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: TopicName,
    pub packet_id: Option<PacketId>,
    pub payload: Vec<u8>,
}

impl PublishPacket {
    /// # Errors
    ///
    /// Returns an error if `topic` is not a valid publish topic name.
    pub fn new(topic: &str, qos: QoS, payload: &[u8]) -> Result<Self, EncodeError> {
        let topic = TopicName::parse(topic).map_err(|_| EncodeError::InvalidTopic)?;
        Ok(Self {
            dup: false,
            qos,
            retain: false,
            topic,
            packet_id: None,
            payload: payload.to_vec(),
        })
    }

    pub fn flags(&self) -> u8 {
        let mut flags = (self.qos as u8) << 1;
        if self.dup {
            flags |= 0x08;
        }
        if self.retain {
            flags |= 0x01;
        }
        flags
    }

    pub fn decode(ba: &mut ByteArray, flags: u8) -> Result<Self, DecodeError> {
        let dup = flags & 0x08 != 0;
        let qos = QoS::try_from((flags & 0x06) >> 1)?;
        let retain = flags & 0x01 != 0;
        // The DUP flag MUST be set to 0 for all QoS 0 messages (MQTT-3.3.1-2).
        if dup && qos == QoS::AtMostOnce {
            return Err(DecodeError::InvalidFixedHeaderFlags);
        }

        let topic_str = ba.read_string()?;
        let topic = TopicName::parse(&topic_str).map_err(|_| DecodeError::InvalidTopic)?;

        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            let id = ba.read_u16()?;
            if id == 0 {
                return Err(DecodeError::InvalidPacketId);
            }
            Some(id)
        };

        let payload = ba.read_rest().to_vec();

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            payload,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
        write_string(buf, self.topic.as_str())?;
        if self.qos != QoS::AtMostOnce {
            let id = self.packet_id.ok_or(EncodeError::InvalidPacketType)?;
            write_u16(buf, id);
        }
        buf.extend_from_slice(&self.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_qos0() {
        let packet = PublishPacket::new("a/b", QoS::AtMostOnce, b"hi").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba, packet.flags()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn round_trips_qos2_with_packet_id() {
        let mut packet = PublishPacket::new("a/b", QoS::ExactlyOnce, b"hi").unwrap();
        packet.packet_id = Some(42);
        packet.retain = true;
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba, packet.flags()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn rejects_dup_on_qos0() {
        let buf = [0u8, 1, b'a'];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut ba, 0x08),
            Err(DecodeError::InvalidFixedHeaderFlags)
        );
    }

    #[test]
    fn rejects_wildcard_in_publish_topic() {
        assert!(PublishPacket::new("a/+", QoS::AtMostOnce, b"").is_err());
    }
}
