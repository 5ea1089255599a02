// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! MQTT 3.1.1 wire codec: the 14 control packets, variable-length remaining-length
//! encoding, and a pull parser that decodes them off an arbitrary byte stream.

mod ack;
mod base;
mod byte_array;
mod connack;
mod connect;
mod empty;
mod error;
mod header;
mod packet;
mod publish;
mod subscribe;
pub mod topic;
mod unsubscribe;
mod var_int;

pub use ack::{PublishAckPacket, PublishCompletePacket, PublishReceivedPacket, PublishReleasePacket};
pub use base::{FixedHeader, PacketId, PacketType, QoS};
pub use byte_array::ByteArray;
pub use connack::{ConnectAckPacket, ConnectReturnCode};
pub use connect::{ConnectPacket, LastWill, ProtocolLevel};
pub use empty::{DisconnectPacket, PingRequestPacket, PingResponsePacket};
pub use error::{DecodeError, EncodeError};
pub use packet::{decode, Decoded, Packet};
pub use publish::PublishPacket;
pub use subscribe::{SubscribeAck, SubscribeAckPacket, SubscribePacket, SubscribeTopic};
pub use topic::{TopicFilter, TopicName};
pub use unsubscribe::{UnsubscribeAckPacket, UnsubscribePacket};
pub use var_int::MAX_REMAINING_LENGTH;
