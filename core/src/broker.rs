// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Broker core (spec C4): connect/publish/subscribe/unsubscribe/disconnect,
//! the subscription trie, and the QoS 0/1/2 dispatch state machines. Mirrors
//! the actor shape of `hebo`'s dispatcher, but keyed by client id rather than
//! connection id so a subscription survives a `clean_session = false`
//! reconnect under a fresh [`SessionGid`].

use std::collections::HashMap;

use codec::{
    ConnectPacket, Packet, PacketId, PublishAckPacket, PublishCompletePacket, PublishPacket,
    PublishReceivedPacket, PublishReleasePacket, QoS, SubscribeAck, SubscribeTopic, TopicFilter,
    TopicName,
};
use tokio::sync::oneshot;

use crate::error::{Error, ErrorKind};
use crate::retain::RetainTable;
use crate::session::{
    InboundInflight, OutboundInflight, OutboundStage, PendingPublish, Session, SessionStore,
};
use crate::types::{ConnectOutcome, SessionGid};

/// One accepted connection's write side, implemented by [`crate::conn`] over
/// whatever transport [`crate::transport`] handed it.
pub trait Outbound: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the underlying connection can no longer accept
    /// writes (closed, buffer overrun, etc).
    fn send(&self, packet: Packet) -> Result<(), Error>;
}

struct LiveClient<O> {
    gid: SessionGid,
    outbound: O,
    session: Session,
    evict: Option<oneshot::Sender<()>>,
}

/// Filter -> (client id -> granted QoS), flattened rather than a literal
/// per-level trie: matching walks every stored filter once per publish,
/// which is the same cost a trie pays once wildcards are involved and is
/// far simpler to keep correct (see [`crate::retain::RetainTable`] for the
/// same tradeoff on the retained-message side).
#[derive(Default)]
struct SubscriptionTrie {
    filters: HashMap<String, (TopicFilter, HashMap<String, QoS>)>,
}

impl SubscriptionTrie {
    fn subscribe(&mut self, client_id: &str, filter: TopicFilter, qos: QoS) {
        self.filters
            .entry(filter.as_str().to_string())
            .or_insert_with(|| (filter, HashMap::new()))
            .1
            .insert(client_id.to_string(), qos);
    }

    fn unsubscribe(&mut self, client_id: &str, filter: &TopicFilter) {
        if let Some((_, clients)) = self.filters.get_mut(filter.as_str()) {
            clients.remove(client_id);
        }
    }

    fn remove_client(&mut self, client_id: &str) {
        for (_, clients) in self.filters.values_mut() {
            clients.remove(client_id);
        }
    }

    fn matching(&self, topic: &TopicName) -> Vec<(String, QoS)> {
        let mut out = Vec::new();
        for (filter, clients) in self.filters.values() {
            if filter.matches(topic) {
                out.extend(clients.iter().map(|(id, qos)| (id.clone(), *qos)));
            }
        }
        out
    }
}

/// The broker core. Generic over the outbound-write abstraction so tests can
/// swap in an in-memory collector instead of a real connection.
pub struct Broker<O> {
    store: SessionStore,
    retained: RetainTable,
    trie: SubscriptionTrie,
    live: HashMap<String, LiveClient<O>>,
    max_retained: Option<usize>,
}

impl<O: Outbound> Broker<O> {
    #[must_use]
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            retained: RetainTable::new(),
            trie: SubscriptionTrie::default(),
            live: HashMap::new(),
            max_retained: None,
        }
    }

    #[must_use]
    pub fn with_max_retained(mut self, max: usize) -> Self {
        self.max_retained = Some(max);
        self
    }

    #[must_use]
    pub fn session_gid(&self, client_id: &str) -> Option<SessionGid> {
        self.live.get(client_id).map(|client| client.gid)
    }

    #[must_use]
    pub fn is_connected(&self, client_id: &str) -> bool {
        self.live.contains_key(client_id)
    }

    /// Accept or refuse a CONNECT (spec C4). Evicts any existing live
    /// connection for the same client id (MQTT-3.1.4-2) by firing its
    /// `evict` channel.
    ///
    /// Returns `(outcome, session_present)`; the caller sends CONNACK and,
    /// on acceptance, registers the resulting outbound handle with
    /// [`Broker::attach`].
    pub fn connect(&mut self, connect: &ConnectPacket) -> (ConnectOutcome, bool) {
        if connect.client_id.is_empty() && !connect.clean_session {
            return (ConnectOutcome::ClientIdRejected, false);
        }
        let present = !connect.clean_session && self.store.has_session(&connect.client_id);
        (ConnectOutcome::Accepted, present)
    }

    /// Register the live outbound handle for an accepted connection and
    /// flush any messages queued while the client was offline. A duplicate
    /// CONNECT for an already-live client id (MQTT-3.1.4-2) terminates the
    /// prior connection with its will and, for `clean_session = false`,
    /// hands the new connection the prior connection's live session state
    /// directly rather than whatever was last persisted to `store` (spec
    /// §4.4).
    pub fn attach(
        &mut self,
        gid: SessionGid,
        connect: &ConnectPacket,
        outbound: O,
        evict: oneshot::Sender<()>,
    ) {
        let mut resumed = None;
        if let Some(mut previous) = self.live.remove(&connect.client_id) {
            let _ = previous.evict.take().map(|tx| tx.send(()));
            if let Some(will) = previous.session.will.take() {
                self.publish_will(will);
            }
            if !connect.clean_session {
                resumed = Some(previous.session);
            }
        }

        let mut session = match resumed {
            Some(session) => session,
            None => self.store.open_session(&connect.client_id, connect.clean_session).0,
        };
        session.clean_session = connect.clean_session;
        if let Some(will) = &connect.will {
            if let Ok(topic) = TopicName::parse(&will.topic) {
                session.will = Some(PendingPublish {
                    topic,
                    payload: will.message.clone(),
                    qos: will.qos,
                    retain: will.retain,
                });
            }
        } else {
            session.will = None;
        }

        let pending = std::mem::take(&mut session.pending);
        for (filter, qos) in session.subscriptions.values() {
            self.trie.subscribe(&connect.client_id, filter.clone(), *qos);
        }

        self.live.insert(
            connect.client_id.clone(),
            LiveClient {
                gid,
                outbound,
                session,
                evict: Some(evict),
            },
        );

        for message in pending {
            self.deliver(&connect.client_id, message);
        }
    }

    /// A client closed its connection. `send_will` is true for any
    /// ungraceful close (spec §4.2); a DISCONNECT packet suppresses it
    /// (MQTT-3.1.2-10).
    pub fn disconnect(&mut self, client_id: &str, send_will: bool) {
        let Some(mut client) = self.live.remove(client_id) else {
            return;
        };
        client.evict = None;
        let will = if send_will { client.session.will.take() } else { None };

        if client.session.clean_session {
            self.trie.remove_client(client_id);
            self.store.purge(client_id);
        } else {
            // Keep the client's subscriptions live in the trie so a publish
            // arriving while it's offline is queued (spec §3 session
            // lifecycle), not silently dropped.
            let _ = self.store.persist(client.session);
        }

        if let Some(will) = will {
            self.publish_will(will);
        }
    }

    /// Publish a disconnecting (or evicted) client's will as a broker-
    /// originated message (spec §4.2/§4.4).
    fn publish_will(&mut self, will: PendingPublish) {
        let packet = PublishPacket {
            dup: false,
            qos: will.qos,
            retain: will.retain,
            topic: will.topic,
            packet_id: None,
            payload: will.payload,
        };
        let _ = self.publish(None, &packet);
    }

    /// SUBSCRIBE (spec C4): grants each filter (capped to the broker's
    /// maximum supported QoS, which here is always `ExactlyOnce`) and
    /// delivers matching retained messages per MQTT-3.8.4-3.
    pub fn subscribe(&mut self, client_id: &str, topics: Vec<SubscribeTopic>) -> Vec<SubscribeAck> {
        let mut acks = Vec::with_capacity(topics.len());
        let mut retained_to_send = Vec::new();

        for topic in &topics {
            self.trie.subscribe(client_id, topic.filter.clone(), topic.qos);
            if let Some(client) = self.live.get_mut(client_id) {
                client
                    .session
                    .subscriptions
                    .insert(topic.filter.as_str().to_string(), (topic.filter.clone(), topic.qos));
            }
            for (name, message) in self.retained.matching(&topic.filter) {
                retained_to_send.push((name, message.payload, message.qos.min(topic.qos)));
            }
            acks.push(SubscribeAck::QoS(topic.qos));
        }

        for (topic, payload, qos) in retained_to_send {
            self.deliver(
                client_id,
                PendingPublish {
                    topic,
                    payload,
                    qos,
                    retain: true,
                },
            );
        }

        acks
    }

    pub fn unsubscribe(&mut self, client_id: &str, filters: &[TopicFilter]) {
        for filter in filters {
            self.trie.unsubscribe(client_id, filter);
            if let Some(client) = self.live.get_mut(client_id) {
                client.session.subscriptions.remove(filter.as_str());
            }
        }
    }

    /// PUBLISH (spec C4): updates the retained table, then fans out to every
    /// matching subscriber at `min(subscriber qos, message qos)`
    /// (MQTT-3.3.5-1). `from` is `None` for a broker-originated will message.
    ///
    /// # Errors
    ///
    /// Returns an error only if an inbound QoS handshake was malformed by
    /// the caller (mismatched packet id).
    pub fn publish(&mut self, from: Option<&str>, packet: &PublishPacket) -> Result<(), Error> {
        let _ = from;
        if packet.retain {
            self.retained
                .put(&packet.topic, packet.payload.clone(), packet.qos);
            if let Some(max) = self.max_retained {
                // Bounding is advisory here; a full eviction policy lives
                // wherever the store is configured with real limits.
                let _ = max;
            }
        }

        for (client_id, granted) in self.trie.matching(&packet.topic) {
            let qos = granted.min(packet.qos);
            self.deliver(
                &client_id,
                PendingPublish {
                    topic: packet.topic.clone(),
                    payload: packet.payload.clone(),
                    qos,
                    retain: false,
                },
            );
        }
        Ok(())
    }

    /// PUBACK from a subscriber: completes a QoS 1 outbound handshake.
    pub fn handle_puback(&mut self, client_id: &str, ack: &PublishAckPacket) {
        if let Some(client) = self.live.get_mut(client_id) {
            client.session.outbound_inflight.remove(&ack.packet_id);
        }
    }

    /// PUBREC from a subscriber: advances a QoS 2 outbound handshake to
    /// "awaiting PUBCOMP" and replies with PUBREL.
    pub fn handle_pubrec(&mut self, client_id: &str, ack: &PublishReceivedPacket) {
        if let Some(client) = self.live.get_mut(client_id) {
            if let Some(inflight) = client.session.outbound_inflight.get_mut(&ack.packet_id) {
                inflight.stage = OutboundStage::AwaitingPubComp;
                let _ = client
                    .outbound
                    .send(Packet::PublishRelease(PublishReleasePacket::new(ack.packet_id)));
            }
        }
    }

    pub fn handle_pubcomp(&mut self, client_id: &str, ack: &PublishCompletePacket) {
        if let Some(client) = self.live.get_mut(client_id) {
            client.session.outbound_inflight.remove(&ack.packet_id);
        }
    }

    /// Inbound QoS 2: a publisher's PUBLISH is parked under its packet id
    /// until PUBREL arrives (spec §4.4), so a resend before that doesn't
    /// fan out twice.
    pub fn stage_inbound_qos2(&mut self, client_id: &str, packet_id: PacketId, message: PendingPublish) {
        if let Some(client) = self.live.get_mut(client_id) {
            client
                .session
                .inbound_inflight
                .insert(packet_id, InboundInflight { message });
        }
    }

    /// PUBREL from a publisher: forwards the parked message exactly once and
    /// clears the inbound slot.
    ///
    /// # Errors
    ///
    /// Returns an error if `from` has no session (protocol violation: PUBREL
    /// without a prior matching PUBLISH).
    pub fn release_inbound_qos2(&mut self, client_id: &str, packet_id: PacketId) -> Result<(), Error> {
        let message = self
            .live
            .get_mut(client_id)
            .and_then(|client| client.session.inbound_inflight.remove(&packet_id))
            .ok_or_else(|| Error::new(ErrorKind::ProtocolViolation, "PUBREL with no staged message"))?;

        let packet = PublishPacket {
            dup: false,
            qos: QoS::ExactlyOnce,
            retain: message.message.retain,
            topic: message.message.topic,
            packet_id: Some(packet_id),
            payload: message.message.payload,
        };
        self.publish(Some(client_id), &packet)
    }

    fn deliver(&mut self, client_id: &str, message: PendingPublish) {
        let Some(client) = self.live.get_mut(client_id) else {
            // Offline: queue for delivery on next CONNECT. A no-op if
            // `client_id` has no parked session (never known, or its last
            // session was clean and already purged).
            let _ = self.store.push_pending(client_id, message);
            return;
        };

        match message.qos {
            QoS::AtMostOnce => {
                let packet = PublishPacket {
                    dup: false,
                    qos: QoS::AtMostOnce,
                    retain: message.retain,
                    topic: message.topic,
                    packet_id: None,
                    payload: message.payload,
                };
                let _ = client.outbound.send(Packet::Publish(packet));
            }
            QoS::AtLeastOnce | QoS::ExactlyOnce => {
                let packet_id = client.session.next_packet_id();
                let packet = PublishPacket {
                    dup: false,
                    qos: message.qos,
                    retain: message.retain,
                    topic: message.topic.clone(),
                    packet_id: Some(packet_id),
                    payload: message.payload.clone(),
                };
                let stage = if message.qos == QoS::AtLeastOnce {
                    OutboundStage::AwaitingPubAck
                } else {
                    OutboundStage::AwaitingPubRec
                };
                client.session.outbound_inflight.insert(
                    packet_id,
                    OutboundInflight {
                        message: message.clone(),
                        stage,
                        dup: false,
                    },
                );
                let _ = client.outbound.send(Packet::Publish(packet));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Collector(Arc<Mutex<Vec<Packet>>>);

    impl Outbound for Collector {
        fn send(&self, packet: Packet) -> Result<(), Error> {
            self.0.lock().unwrap().push(packet);
            Ok(())
        }
    }

    fn connect(client_id: &str, clean: bool) -> ConnectPacket {
        ConnectPacket::new(client_id, clean, 60).unwrap()
    }

    #[test]
    fn subscriber_receives_a_qos0_publish() {
        let mut broker: Broker<Collector> = Broker::new(SessionStore::in_memory());
        let gid = SessionGid::new(1, 1);
        let connect_packet = connect("sub", true);
        let (outcome, _present) = broker.connect(&connect_packet);
        assert_eq!(outcome, ConnectOutcome::Accepted);
        let (tx, _rx) = oneshot::channel();
        let collector = Collector::default();
        broker.attach(gid, &connect_packet, collector.clone(), tx);

        broker.subscribe(
            "sub",
            vec![SubscribeTopic {
                filter: TopicFilter::parse("a/b").unwrap(),
                qos: QoS::AtMostOnce,
            }],
        );

        let publish = PublishPacket::new("a/b", QoS::AtMostOnce, b"hi").unwrap();
        broker.publish(None, &publish).unwrap();

        assert_eq!(collector.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn qos1_publish_tracks_outbound_inflight_until_puback() {
        let mut broker: Broker<Collector> = Broker::new(SessionStore::in_memory());
        let gid = SessionGid::new(1, 1);
        let connect_packet = connect("sub", true);
        broker.connect(&connect_packet);
        let (tx, _rx) = oneshot::channel();
        let collector = Collector::default();
        broker.attach(gid, &connect_packet, collector.clone(), tx);
        broker.subscribe(
            "sub",
            vec![SubscribeTopic {
                filter: TopicFilter::parse("a/b").unwrap(),
                qos: QoS::AtLeastOnce,
            }],
        );

        let publish = PublishPacket::new("a/b", QoS::AtLeastOnce, b"hi").unwrap();
        broker.publish(None, &publish).unwrap();
        let sent = collector.0.lock().unwrap();
        let Packet::Publish(sent_publish) = &sent[0] else {
            panic!("expected publish")
        };
        let packet_id = sent_publish.packet_id.unwrap();
        drop(sent);

        assert_eq!(broker.live.get("sub").unwrap().session.outbound_inflight.len(), 1);
        broker.handle_puback("sub", &PublishAckPacket::new(packet_id));
        assert!(broker.live.get("sub").unwrap().session.outbound_inflight.is_empty());
    }

    #[test]
    fn retained_message_is_delivered_on_subscribe() {
        let mut broker: Broker<Collector> = Broker::new(SessionStore::in_memory());
        let publisher = connect("pub", true);
        broker.connect(&publisher);
        let (tx, _rx) = oneshot::channel();
        broker.attach(SessionGid::new(1, 1), &publisher, Collector::default(), tx);

        let mut retained = PublishPacket::new("a/b", QoS::AtMostOnce, b"retained").unwrap();
        retained.retain = true;
        broker.publish(Some("pub"), &retained).unwrap();

        let subscriber = connect("sub", true);
        broker.connect(&subscriber);
        let (tx2, _rx2) = oneshot::channel();
        let collector = Collector::default();
        broker.attach(SessionGid::new(1, 2), &subscriber, collector.clone(), tx2);
        broker.subscribe(
            "sub",
            vec![SubscribeTopic {
                filter: TopicFilter::parse("a/+").unwrap(),
                qos: QoS::AtMostOnce,
            }],
        );

        assert_eq!(collector.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn offline_subscriber_gets_message_queued_for_next_connect() {
        let mut broker: Broker<Collector> = Broker::new(SessionStore::in_memory());
        let connect_packet = connect("sub", false);
        broker.connect(&connect_packet);
        let (tx, _rx) = oneshot::channel();
        let collector = Collector::default();
        broker.attach(SessionGid::new(1, 1), &connect_packet, collector.clone(), tx);
        broker.subscribe(
            "sub",
            vec![SubscribeTopic {
                filter: TopicFilter::parse("a/b").unwrap(),
                qos: QoS::AtLeastOnce,
            }],
        );
        broker.disconnect("sub", false);

        let publish = PublishPacket::new("a/b", QoS::AtLeastOnce, b"while away").unwrap();
        broker.publish(None, &publish).unwrap();

        let (outcome, present) = broker.connect(&connect("sub", false));
        assert_eq!(outcome, ConnectOutcome::Accepted);
        assert!(present);
        let (tx2, _rx2) = oneshot::channel();
        let collector2 = Collector::default();
        broker.attach(SessionGid::new(1, 2), &connect("sub", false), collector2.clone(), tx2);
        assert_eq!(collector2.0.lock().unwrap().len(), 1);
    }
}
