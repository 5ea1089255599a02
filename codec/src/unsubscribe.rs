// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::base::PacketId;
use crate::byte_array::{write_string, write_u16, ByteArray};
use crate::error::{DecodeError, EncodeError};
use crate::topic::TopicFilter;

/// UNSUBSCRIBE (MQTT-3.10).
#[derive(Clone, Debug, PartialEq)]
pub struct UnsubscribePacket {
    pub packet_id: PacketId,
    pub filters: Vec<TopicFilter>,
}

impl UnsubscribePacket {
    pub fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let packet_id = ba.read_u16()?;
        if packet_id == 0 {
            return Err(DecodeError::InvalidPacketId);
        }
        let mut filters = Vec::new();
        while ba.remaining_bytes() > 0 {
            let filter_str = ba.read_string()?;
            filters.push(TopicFilter::parse(&filter_str).map_err(|_| DecodeError::InvalidTopic)?);
        }
        if filters.is_empty() {
            return Err(DecodeError::EmptyTopicList);
        }
        Ok(Self { packet_id, filters })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
        write_u16(buf, self.packet_id);
        for filter in &self.filters {
            write_string(buf, filter.as_str())?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UnsubscribeAckPacket {
    pub packet_id: PacketId,
}

impl UnsubscribeAckPacket {
    #[must_use]
    pub const fn new(packet_id: PacketId) -> Self {
        Self { packet_id }
    }

    pub fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        Ok(Self {
            packet_id: ba.read_u16()?,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
        write_u16(buf, self.packet_id);
        Ok(())
    }
}
