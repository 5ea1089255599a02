// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Tagged union over the 14 MQTT 3.1.1 control packets, and the pull parser
//! that turns a byte buffer into a stream of them (spec C1).

use crate::ack::{PublishAckPacket, PublishCompletePacket, PublishReceivedPacket, PublishReleasePacket};
use crate::base::PacketType;
use crate::byte_array::ByteArray;
use crate::connack::ConnectAckPacket;
use crate::connect::ConnectPacket;
use crate::empty::{DisconnectPacket, PingRequestPacket, PingResponsePacket};
use crate::error::{DecodeError, EncodeError};
use crate::header::{decode_fixed_header, encode_fixed_header};
use crate::publish::PublishPacket;
use crate::subscribe::{SubscribeAckPacket, SubscribePacket};
use crate::unsubscribe::{UnsubscribeAckPacket, UnsubscribePacket};

#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnectAck(ConnectAckPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    Subscribe(SubscribePacket),
    SubscribeAck(SubscribeAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingRequest(PingRequestPacket),
    PingResponse(PingResponsePacket),
    Disconnect(DisconnectPacket),
}

impl Packet {
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnectAck(_) => PacketType::ConnectAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PublishAck(_) => PacketType::PublishAck,
            Packet::PublishReceived(_) => PacketType::PublishReceived,
            Packet::PublishRelease(_) => PacketType::PublishRelease,
            Packet::PublishComplete(_) => PacketType::PublishComplete,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubscribeAck(_) => PacketType::SubscribeAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubscribeAck(_) => PacketType::UnsubscribeAck,
            Packet::PingRequest(_) => PacketType::PingRequest,
            Packet::PingResponse(_) => PacketType::PingResponse,
            Packet::Disconnect(_) => PacketType::Disconnect,
        }
    }

    fn flags(&self) -> u8 {
        match self {
            Packet::Publish(p) => p.flags(),
            Packet::PublishRelease(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) => 0b0010,
            _ => 0,
        }
    }

    /// Encode this packet to its complete wire representation (fixed header
    /// + variable header + payload).
    ///
    /// # Errors
    ///
    /// Returns an error if the packet's fields cannot be represented on the
    /// wire (oversized strings, missing packet id where QoS requires one).
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut body = Vec::new();
        match self {
            Packet::Connect(p) => p.encode(&mut body)?,
            Packet::ConnectAck(p) => p.encode(&mut body)?,
            Packet::Publish(p) => p.encode(&mut body)?,
            Packet::PublishAck(p) => p.encode(&mut body)?,
            Packet::PublishReceived(p) => p.encode(&mut body)?,
            Packet::PublishRelease(p) => p.encode(&mut body)?,
            Packet::PublishComplete(p) => p.encode(&mut body)?,
            Packet::Subscribe(p) => p.encode(&mut body)?,
            Packet::SubscribeAck(p) => p.encode(&mut body)?,
            Packet::Unsubscribe(p) => p.encode(&mut body)?,
            Packet::UnsubscribeAck(p) => p.encode(&mut body)?,
            Packet::PingRequest(_) | Packet::PingResponse(_) | Packet::Disconnect(_) => {}
        }

        let mut buf = Vec::with_capacity(body.len() + 5);
        encode_fixed_header(&mut buf, self.packet_type(), self.flags(), body.len())?;
        buf.extend_from_slice(&body);
        Ok(buf)
    }
}

/// Outcome of one [`decode`] call against a connection's receive buffer.
pub enum Decoded {
    /// `buf` does not yet contain a complete packet; buffer more bytes.
    NeedMore,
    /// A full packet was decoded, consuming `usize` bytes from the front of `buf`.
    Packet(Packet, usize),
    /// `buf` starts with bytes that can never form a valid MQTT packet.
    /// The caller must close the connection without sending DISCONNECT.
    Malformed(DecodeError),
}

/// Pull-parse one packet from the front of `buf`, per spec C1.
#[must_use]
pub fn decode(buf: &[u8]) -> Decoded {
    let (header, header_len) = match decode_fixed_header(buf) {
        Ok(Some(v)) => v,
        Ok(None) => return Decoded::NeedMore,
        Err(e) => return Decoded::Malformed(e),
    };

    let total_len = header_len + header.remaining_length;
    if buf.len() < total_len {
        return Decoded::NeedMore;
    }

    let body = &buf[header_len..total_len];
    let mut ba = ByteArray::new(body);

    let result = decode_body(header.packet_type, header.flags, &mut ba);
    match result {
        Ok(packet) => {
            if ba.remaining_bytes() != 0 {
                Decoded::Malformed(DecodeError::RemainingLengthMismatch)
            } else {
                Decoded::Packet(packet, total_len)
            }
        }
        Err(DecodeError::Incomplete) => Decoded::Malformed(DecodeError::RemainingLengthMismatch),
        Err(e) => Decoded::Malformed(e),
    }
}

fn decode_body(packet_type: PacketType, flags: u8, ba: &mut ByteArray) -> Result<Packet, DecodeError> {
    Ok(match packet_type {
        PacketType::Connect => Packet::Connect(ConnectPacket::decode(ba)?),
        PacketType::ConnectAck => Packet::ConnectAck(ConnectAckPacket::decode(ba)?),
        PacketType::Publish => Packet::Publish(PublishPacket::decode(ba, flags)?),
        PacketType::PublishAck => Packet::PublishAck(PublishAckPacket::decode(ba)?),
        PacketType::PublishReceived => Packet::PublishReceived(PublishReceivedPacket::decode(ba)?),
        PacketType::PublishRelease => Packet::PublishRelease(PublishReleasePacket::decode(ba)?),
        PacketType::PublishComplete => Packet::PublishComplete(PublishCompletePacket::decode(ba)?),
        PacketType::Subscribe => Packet::Subscribe(SubscribePacket::decode(ba)?),
        PacketType::SubscribeAck => Packet::SubscribeAck(SubscribeAckPacket::decode(ba)?),
        PacketType::Unsubscribe => Packet::Unsubscribe(UnsubscribePacket::decode(ba)?),
        PacketType::UnsubscribeAck => Packet::UnsubscribeAck(UnsubscribeAckPacket::decode(ba)?),
        PacketType::PingRequest => Packet::PingRequest(PingRequestPacket::new()),
        PacketType::PingResponse => Packet::PingResponse(PingResponsePacket::new()),
        PacketType::Disconnect => Packet::Disconnect(DisconnectPacket::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::QoS;

    #[test]
    fn round_trips_every_packet_kind_through_the_pull_parser() {
        let publish = Packet::Publish(PublishPacket::new("a/b", QoS::AtMostOnce, b"hi").unwrap());
        let bytes = publish.encode().unwrap();
        match decode(&bytes) {
            Decoded::Packet(p, consumed) => {
                assert_eq!(consumed, bytes.len());
                assert_eq!(p, publish);
            }
            _ => panic!("expected a decoded packet"),
        }
    }

    #[test]
    fn needs_more_on_a_split_packet() {
        let publish = Packet::Publish(PublishPacket::new("a/b", QoS::AtMostOnce, b"hi").unwrap());
        let bytes = publish.encode().unwrap();
        assert!(matches!(decode(&bytes[..bytes.len() - 1]), Decoded::NeedMore));
    }

    #[test]
    fn malformed_on_garbage() {
        let bytes = [0xffu8, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(decode(&bytes), Decoded::Malformed(_)));
    }

    #[test]
    fn pingreq_round_trips_with_no_payload() {
        let bytes = Packet::PingRequest(PingRequestPacket::new()).encode().unwrap();
        assert_eq!(bytes, vec![0xc0, 0x00]);
        match decode(&bytes) {
            Decoded::Packet(Packet::PingRequest(_), 2) => {}
            _ => panic!("expected PINGREQ"),
        }
    }
}
