// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Client-side MQTT engine shared by the integrator, bridge, publisher and
//! subscriber roles (spec §4.5's "client-side callback table"). Grounded on
//! `ruo::async_client::AsyncClient`'s packet-id bookkeeping, rebuilt on top
//! of [`crate::conn::Connection`] instead of driving its own socket loop.

use std::collections::HashMap;

use codec::{
    ConnectPacket, LastWill, Packet, PacketId, PublishAckPacket, PublishCompletePacket,
    PublishPacket, PublishReceivedPacket, PublishReleasePacket, QoS, SubscribeAck,
    SubscribeAckPacket, SubscribePacket, SubscribeTopic, TopicFilter, UnsubscribeAckPacket,
    UnsubscribePacket,
};

use crate::conn::OutboundHandle;
use crate::error::{Error, ErrorKind};

/// Parameters for the CONNECT this client opens with.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub will: Option<LastWill>,
}

impl ClientOptions {
    #[must_use]
    pub fn new(client_id: impl Into<String>, keep_alive: u16) -> Self {
        Self {
            client_id: client_id.into(),
            clean_session: true,
            keep_alive,
            username: None,
            password: None,
            will: None,
        }
    }

    fn into_connect_packet(self) -> Result<ConnectPacket, Error> {
        let mut packet = ConnectPacket::new(&self.client_id, self.clean_session, self.keep_alive)?;
        packet.username = self.username;
        packet.password = self.password;
        packet.will = self.will;
        Ok(packet)
    }
}

/// What the owning run loop should do in reaction to one inbound packet
/// (spec §4.5). Most variants are already fully handled by
/// [`Client::handle_inbound`]'s own handshake bookkeeping: this is only
/// what's left for application code to act on.
#[derive(Debug)]
pub enum ClientEvent {
    ConnectAccepted { session_present: bool },
    ConnectRejected(codec::ConnectReturnCode),
    Message { topic: String, payload: Vec<u8>, qos: QoS, retain: bool },
    Subscribed { packet_id: PacketId, acks: Vec<SubscribeAck> },
    Unsubscribed { packet_id: PacketId },
    Pong,
    Disconnected,
}

/// Per-packet-id bookkeeping for an MQTT client's own QoS 1/2 outbound
/// publishes, and QoS 2 inbound ones staged awaiting PUBREL.
pub struct Client {
    outbound: OutboundHandle,
    next_packet_id: PacketId,
    outbound_qos12: HashMap<PacketId, PublishPacket>,
    inbound_qos2: HashMap<PacketId, PublishPacket>,
    pending_subscribe: HashMap<PacketId, Vec<SubscribeTopic>>,
    pending_unsubscribe: HashMap<PacketId, Vec<TopicFilter>>,
}

impl Client {
    #[must_use]
    pub fn new(outbound: OutboundHandle) -> Self {
        Self {
            outbound,
            next_packet_id: 1,
            outbound_qos12: HashMap::new(),
            inbound_qos2: HashMap::new(),
            pending_subscribe: HashMap::new(),
            pending_unsubscribe: HashMap::new(),
        }
    }

    fn next_packet_id(&mut self) -> PacketId {
        let id = self.next_packet_id;
        self.next_packet_id = if id == PacketId::MAX { 1 } else { id + 1 };
        id
    }

    /// Send the opening CONNECT. Must be the first packet on the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if `options` cannot be encoded, or the connection
    /// runtime has already stopped.
    pub fn connect(&self, options: ClientOptions) -> Result<(), Error> {
        let packet = options.into_connect_packet()?;
        self.outbound.send(Packet::Connect(packet))
    }

    /// # Errors
    ///
    /// Returns an error if `topic` is invalid or the connection runtime has
    /// stopped.
    pub fn publish(&mut self, topic: &str, qos: QoS, payload: &[u8], retain: bool) -> Result<(), Error> {
        let mut packet = PublishPacket::new(topic, qos, payload)?;
        packet.retain = retain;
        if qos != QoS::AtMostOnce {
            let packet_id = self.next_packet_id();
            packet.packet_id = Some(packet_id);
            self.outbound_qos12.insert(packet_id, packet.clone());
        }
        self.outbound.send(Packet::Publish(packet))
    }

    /// # Errors
    ///
    /// Returns an error if the connection runtime has stopped.
    pub fn subscribe(&mut self, topics: Vec<SubscribeTopic>) -> Result<PacketId, Error> {
        let packet_id = self.next_packet_id();
        self.pending_subscribe.insert(packet_id, topics.clone());
        self.outbound.send(Packet::Subscribe(SubscribePacket { packet_id, topics }))?;
        Ok(packet_id)
    }

    /// # Errors
    ///
    /// Returns an error if the connection runtime has stopped.
    pub fn unsubscribe(&mut self, filters: Vec<TopicFilter>) -> Result<PacketId, Error> {
        let packet_id = self.next_packet_id();
        self.pending_unsubscribe.insert(packet_id, filters.clone());
        self.outbound
            .send(Packet::Unsubscribe(UnsubscribePacket { packet_id, filters }))?;
        Ok(packet_id)
    }

    /// # Errors
    ///
    /// Returns an error if the connection runtime has stopped.
    pub fn ping(&self) -> Result<(), Error> {
        self.outbound.send(Packet::PingRequest(codec::PingRequestPacket::new()))
    }

    /// # Errors
    ///
    /// Returns an error if the connection runtime has stopped.
    pub fn disconnect(&self) -> Result<(), Error> {
        self.outbound.send(Packet::Disconnect(codec::DisconnectPacket::new()))
    }

    /// Advance the client's handshake state machines with one packet
    /// received from the broker, returning the event (if any) application
    /// code should act on.
    ///
    /// # Errors
    ///
    /// Returns an error on a protocol violation (e.g. PUBREL for an
    /// unstaged packet id).
    pub fn handle_inbound(&mut self, packet: Packet) -> Result<Option<ClientEvent>, Error> {
        match packet {
            Packet::ConnectAck(ack) => {
                if ack.return_code == codec::ConnectReturnCode::Accepted {
                    Ok(Some(ClientEvent::ConnectAccepted {
                        session_present: ack.session_present,
                    }))
                } else {
                    Ok(Some(ClientEvent::ConnectRejected(ack.return_code)))
                }
            }
            Packet::Publish(publish) => self.handle_inbound_publish(publish),
            Packet::PublishAck(PublishAckPacket { packet_id }) => {
                self.outbound_qos12.remove(&packet_id);
                Ok(None)
            }
            Packet::PublishReceived(PublishReceivedPacket { packet_id }) => {
                if self.outbound_qos12.contains_key(&packet_id) {
                    self.outbound
                        .send(Packet::PublishRelease(PublishReleasePacket::new(packet_id)))?;
                }
                Ok(None)
            }
            Packet::PublishComplete(PublishCompletePacket { packet_id }) => {
                self.outbound_qos12.remove(&packet_id);
                Ok(None)
            }
            Packet::PublishRelease(PublishReleasePacket { packet_id }) => {
                let staged = self.inbound_qos2.remove(&packet_id).ok_or_else(|| {
                    Error::new(ErrorKind::ProtocolViolation, "PUBREL for an unstaged packet id")
                })?;
                self.outbound
                    .send(Packet::PublishComplete(PublishCompletePacket::new(packet_id)))?;
                Ok(Some(ClientEvent::Message {
                    topic: staged.topic.as_str().to_string(),
                    payload: staged.payload,
                    qos: QoS::ExactlyOnce,
                    retain: staged.retain,
                }))
            }
            Packet::SubscribeAck(SubscribeAckPacket { packet_id, acks }) => {
                self.pending_subscribe.remove(&packet_id);
                Ok(Some(ClientEvent::Subscribed { packet_id, acks }))
            }
            Packet::UnsubscribeAck(UnsubscribeAckPacket { packet_id }) => {
                self.pending_unsubscribe.remove(&packet_id);
                Ok(Some(ClientEvent::Unsubscribed { packet_id }))
            }
            Packet::PingResponse(_) => Ok(Some(ClientEvent::Pong)),
            Packet::Disconnect(_) => Ok(Some(ClientEvent::Disconnected)),
            Packet::Connect(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) | Packet::PingRequest(_) => {
                Err(Error::new(ErrorKind::ProtocolViolation, "server-only packet received by a client"))
            }
        }
    }

    fn handle_inbound_publish(&mut self, publish: PublishPacket) -> Result<Option<ClientEvent>, Error> {
        match publish.qos {
            QoS::AtMostOnce => Ok(Some(ClientEvent::Message {
                topic: publish.topic.as_str().to_string(),
                payload: publish.payload,
                qos: QoS::AtMostOnce,
                retain: publish.retain,
            })),
            QoS::AtLeastOnce => {
                let packet_id = publish
                    .packet_id
                    .ok_or_else(|| Error::new(ErrorKind::ProtocolViolation, "QoS 1 PUBLISH with no packet id"))?;
                self.outbound.send(Packet::PublishAck(PublishAckPacket::new(packet_id)))?;
                Ok(Some(ClientEvent::Message {
                    topic: publish.topic.as_str().to_string(),
                    payload: publish.payload,
                    qos: QoS::AtLeastOnce,
                    retain: publish.retain,
                }))
            }
            QoS::ExactlyOnce => {
                let packet_id = publish
                    .packet_id
                    .ok_or_else(|| Error::new(ErrorKind::ProtocolViolation, "QoS 2 PUBLISH with no packet id"))?;
                self.outbound
                    .send(Packet::PublishReceived(PublishReceivedPacket::new(packet_id)))?;
                self.inbound_qos2.insert(packet_id, publish);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle() -> (OutboundHandle, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (OutboundHandle::new_for_test(tx), rx)
    }

    #[test]
    fn qos1_inbound_publish_sends_puback_and_surfaces_message() {
        let (outbound, mut rx) = handle();
        let mut client = Client::new(outbound);

        let mut publish = PublishPacket::new("a/b", QoS::AtLeastOnce, b"hi").unwrap();
        publish.packet_id = Some(5);
        let event = client.handle_inbound(Packet::Publish(publish)).unwrap();

        assert!(matches!(event, Some(ClientEvent::Message { .. })));
        match rx.try_recv().unwrap() {
            Packet::PublishAck(ack) => assert_eq!(ack.packet_id, 5),
            _ => panic!("expected PUBACK"),
        }
    }

    #[test]
    fn qos2_inbound_publish_waits_for_pubrel_before_surfacing() {
        let (outbound, mut rx) = handle();
        let mut client = Client::new(outbound);

        let mut publish = PublishPacket::new("a/b", QoS::ExactlyOnce, b"hi").unwrap();
        publish.packet_id = Some(9);
        let event = client.handle_inbound(Packet::Publish(publish)).unwrap();
        assert!(event.is_none());
        assert!(matches!(rx.try_recv().unwrap(), Packet::PublishReceived(_)));

        let event = client
            .handle_inbound(Packet::PublishRelease(PublishReleasePacket::new(9)))
            .unwrap();
        assert!(matches!(event, Some(ClientEvent::Message { .. })));
        assert!(matches!(rx.try_recv().unwrap(), Packet::PublishComplete(_)));
    }

    #[test]
    fn pubrel_for_unknown_packet_id_is_a_protocol_violation() {
        let (outbound, _rx) = handle();
        let mut client = Client::new(outbound);
        assert!(client
            .handle_inbound(Packet::PublishRelease(PublishReleasePacket::new(1)))
            .is_err());
    }
}
