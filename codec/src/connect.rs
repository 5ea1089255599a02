// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::base::QoS;
use crate::byte_array::{write_binary, write_string, write_u16, ByteArray};
use crate::error::{DecodeError, EncodeError};

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProtocolLevel {
    V311 = 4,
}

impl TryFrom<u8> for ProtocolLevel {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            4 => Ok(ProtocolLevel::V311),
            _ => Err(DecodeError::InvalidProtocolLevel),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LastWill {
    pub topic: String,
    pub message: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// CONNECT, the first packet on every connection (MQTT-3.1).
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectPacket {
    pub protocol_level: ProtocolLevel,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<LastWill>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl ConnectPacket {
    /// # Errors
    ///
    /// Returns an error if `client_id` exceeds the 23-character MQTT-3.1.1
    /// limit while `clean_session` is false (the broker must then assign one).
    pub fn new(client_id: &str, clean_session: bool, keep_alive: u16) -> Result<Self, EncodeError> {
        if !clean_session && client_id.is_empty() {
            return Err(EncodeError::InvalidClientId);
        }
        Ok(Self {
            protocol_level: ProtocolLevel::V311,
            clean_session,
            keep_alive,
            client_id: client_id.to_string(),
            will: None,
            username: None,
            password: None,
        })
    }

    pub fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let protocol_name = ba.read_string()?;
        if protocol_name != "MQTT" {
            return Err(DecodeError::InvalidProtocolName);
        }
        let level_byte = ba.read_byte()?;
        let protocol_level = ProtocolLevel::try_from(level_byte)?;

        let flags = ba.read_byte()?;
        if flags & 0x01 != 0 {
            // Reserved bit must be 0 (MQTT-3.1.2-3).
            return Err(DecodeError::InvalidFixedHeaderFlags);
        }
        let clean_session = flags & 0x02 != 0;
        let will_flag = flags & 0x04 != 0;
        let will_qos = QoS::try_from((flags & 0x18) >> 3)?;
        let will_retain = flags & 0x20 != 0;
        let password_flag = flags & 0x40 != 0;
        let username_flag = flags & 0x80 != 0;

        let keep_alive = ba.read_u16()?;
        let client_id = ba.read_string()?;
        if client_id.is_empty() && !clean_session {
            return Err(DecodeError::InvalidClientId);
        }

        let will = if will_flag {
            let topic = ba.read_string()?;
            let message_len = ba.read_u16()? as usize;
            let message = ba.read_bytes(message_len)?.to_vec();
            Some(LastWill {
                topic,
                message,
                qos: will_qos,
                retain: will_retain,
            })
        } else {
            None
        };

        let username = if username_flag {
            Some(ba.read_string()?)
        } else {
            None
        };
        let password = if password_flag {
            let len = ba.read_u16()? as usize;
            Some(ba.read_bytes(len)?.to_vec())
        } else {
            None
        };

        Ok(Self {
            protocol_level,
            clean_session,
            keep_alive,
            client_id,
            will,
            username,
            password,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
        write_string(buf, "MQTT")?;
        buf.push(self.protocol_level as u8);

        let mut flags = 0u8;
        if self.clean_session {
            flags |= 0x02;
        }
        if let Some(will) = &self.will {
            flags |= 0x04;
            flags |= (will.qos as u8) << 3;
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        buf.push(flags);

        write_u16(buf, self.keep_alive);
        write_string(buf, &self.client_id)?;

        if let Some(will) = &self.will {
            write_string(buf, &will.topic)?;
            write_binary(buf, &will.message)?;
        }
        if let Some(username) = &self.username {
            write_string(buf, username)?;
        }
        if let Some(password) = &self.password {
            write_binary(buf, password)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_connect_with_will_and_credentials() {
        let mut packet = ConnectPacket::new("client-1", true, 60).unwrap();
        packet.will = Some(LastWill {
            topic: "a/b".to_string(),
            message: b"bye".to_vec(),
            qos: QoS::AtLeastOnce,
            retain: true,
        });
        packet.username = Some("user".to_string());
        packet.password = Some(b"pass".to_vec());

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn rejects_empty_client_id_without_clean_session() {
        assert!(ConnectPacket::new("", false, 60).is_err());
    }
}
