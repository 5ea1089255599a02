// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Server-Sent Events distribution for bridge/broker lifecycle notices
//! (spec C9), grounded on `original_source/mqttbridge/lib/SSEDistributor.cpp`:
//! monotonic event ids, a 39-second `:keep-alive` heartbeat per receiver, and
//! a fixed named-event vocabulary that always carries an `at` timestamp.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};
use tokio_stream::StreamExt;
use warp::sse::Event;

const HEARTBEAT: Duration = Duration::from_secs(39);
const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug, Serialize)]
struct Envelope {
    at: String,
    #[serde(flatten)]
    body: Value,
}

#[derive(Clone)]
struct Emitted {
    id: u64,
    name: &'static str,
    data: String,
}

pub struct EventDistributor {
    sender: broadcast::Sender<Emitted>,
    next_id: AtomicU64,
    start_time: String,
}

impl EventDistributor {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender, next_id: AtomicU64::new(1), start_time: Utc::now().to_rfc3339() }
    }

    /// Returns a `warp::sse::reply`-compatible stream: a synthetic
    /// `bridge-start` event carrying this distributor's start time (sent to
    /// every new subscriber, per `SSEDistributor::addEventReceiver`), then
    /// the subscriber's own events interleaved with a periodic `:keep-alive`
    /// comment.
    pub fn subscribe(&self) -> impl tokio_stream::Stream<Item = Result<Event, Infallible>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let data = serde_json::to_string(&serde_json::json!({"at": self.start_time})).unwrap_or_default();
        let bridge_start = tokio_stream::once(Ok(Event::default().id(id.to_string()).event("bridge-start").data(data)));

        let events = BroadcastStream::new(self.sender.subscribe()).filter_map(|item| {
            item.ok().map(|emitted| {
                Ok(Event::default().id(emitted.id.to_string()).event(emitted.name).data(emitted.data))
            })
        });
        let heartbeats = IntervalStream::new(tokio::time::interval(HEARTBEAT))
            .map(|_| Ok(Event::default().comment("keep-alive")));
        bridge_start.chain(events.merge(heartbeats))
    }

    fn emit(&self, name: &'static str, body: Value) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope { at: Utc::now().to_rfc3339(), body };
        let data = serde_json::to_string(&envelope).unwrap_or_default();
        let _ = self.sender.send(Emitted { id, name, data });
    }

    pub fn bridges_starting(&self) {
        self.emit("bridges_starting", serde_json::json!({}));
    }

    pub fn bridges_started(&self) {
        self.emit("bridges_started", serde_json::json!({}));
    }

    pub fn bridges_stopping(&self) {
        self.emit("bridges_stopping", serde_json::json!({}));
    }

    pub fn bridges_stopped(&self) {
        self.emit("bridges_stopped", serde_json::json!({}));
    }

    pub fn bridge_disabled(&self, name: &str) {
        self.emit("bridge_disabled", serde_json::json!({"bridge": name}));
    }

    pub fn bridge_starting(&self, name: &str) {
        self.emit("bridge_starting", serde_json::json!({"bridge": name}));
    }

    pub fn bridge_started(&self, name: &str) {
        self.emit("bridge_started", serde_json::json!({"bridge": name}));
    }

    pub fn bridge_stopping(&self, name: &str) {
        self.emit("bridge_stopping", serde_json::json!({"bridge": name}));
    }

    pub fn bridge_stopped(&self, name: &str) {
        self.emit("bridge_stopped", serde_json::json!({"bridge": name}));
    }

    pub fn broker_disabled(&self, bridge: &str, instance: &str) {
        self.emit("broker_disabled", serde_json::json!({"bridge": bridge, "instance": instance}));
    }

    pub fn broker_connecting(&self, bridge: &str, instance: &str) {
        self.emit("broker_connecting", serde_json::json!({"bridge": bridge, "instance": instance}));
    }

    pub fn broker_connected(&self, bridge: &str, instance: &str) {
        self.emit("broker_connected", serde_json::json!({"bridge": bridge, "instance": instance}));
    }

    pub fn broker_disconnecting(&self, bridge: &str, instance: &str) {
        self.emit("broker_disconnecting", serde_json::json!({"bridge": bridge, "instance": instance}));
    }

    pub fn broker_disconnected(&self, bridge: &str, instance: &str) {
        self.emit("broker_disconnected", serde_json::json!({"bridge": bridge, "instance": instance}));
    }
}

impl Default for EventDistributor {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedEventDistributor = Arc<EventDistributor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_subscriber_receives_an_emitted_event() {
        let distributor = EventDistributor::new();
        let mut receiver = distributor.sender.subscribe();
        distributor.bridge_started("east");
        let emitted = receiver.recv().await.unwrap();
        assert_eq!(emitted.name, "bridge_started");
        assert!(emitted.data.contains("east"));
        assert_eq!(emitted.id, 1);
    }

    #[tokio::test]
    async fn event_ids_are_monotonically_increasing() {
        let distributor = EventDistributor::new();
        let mut receiver = distributor.sender.subscribe();
        distributor.bridges_starting();
        distributor.bridges_started();
        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert!(second.id > first.id);
    }
}
