// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! A `Bridge` forwards a publish received on one attached connection to
//! every other attached connection, excluding the one it came from — spec
//! §4.7's entire loop-prevention story (`Bridge::publish`, grounded on
//! `original_source/mqttbridge/lib/Bridge.cpp`).

use std::collections::HashMap;

use codec::PublishPacket;
use mqttsuite_core::{Error, Outbound};

/// Identifies one of a bridge's attached connections. The bring-up loop
/// (out of scope here, per C11) assigns these; a `Bridge` only needs them
/// to exclude the origin.
pub type ConnectionId = usize;

pub struct Bridge<O: Outbound> {
    name: String,
    connections: HashMap<ConnectionId, O>,
}

impl<O: Outbound> Bridge<O> {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), connections: HashMap::new() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attach(&mut self, id: ConnectionId, outbound: O) {
        self.connections.insert(id, outbound);
    }

    pub fn detach(&mut self, id: ConnectionId) {
        self.connections.remove(&id);
    }

    #[must_use]
    pub fn is_attached(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Forward `publish` to every attached connection except `origin`.
    /// Loop prevention is exactly this exclusion; `BridgeConnection::loop_prevention`
    /// is an orthogonal, best-effort hint a transport adapter may also act on.
    ///
    /// # Errors
    ///
    /// Returns the first send error encountered; connections after it in
    /// iteration order are still attempted.
    pub fn publish(&self, origin: ConnectionId, publish: &PublishPacket) -> Result<(), Error> {
        let mut first_err = None;
        for (id, outbound) in &self.connections {
            if *id == origin {
                continue;
            }
            if let Err(err) = outbound.send(codec::Packet::Publish(publish.clone())) {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;
    use std::sync::{Arc, Mutex};

    struct Collector(Arc<Mutex<Vec<codec::Packet>>>);

    impl Outbound for Collector {
        fn send(&self, packet: codec::Packet) -> Result<(), Error> {
            self.0.lock().unwrap().push(packet);
            Ok(())
        }
    }

    #[test]
    fn forwards_to_every_connection_except_the_origin() {
        let mut bridge: Bridge<Collector> = Bridge::new("b1");
        let a = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::new(Mutex::new(Vec::new()));
        let c = Arc::new(Mutex::new(Vec::new()));
        bridge.attach(1, Collector(Arc::clone(&a)));
        bridge.attach(2, Collector(Arc::clone(&b)));
        bridge.attach(3, Collector(Arc::clone(&c)));

        let publish = PublishPacket::new("sensors/temp", QoS::AtMostOnce, b"21").unwrap();
        bridge.publish(1, &publish).unwrap();

        assert!(a.lock().unwrap().is_empty());
        assert_eq!(b.lock().unwrap().len(), 1);
        assert_eq!(c.lock().unwrap().len(), 1);
    }

    #[test]
    fn detach_removes_a_connection_from_future_fan_out() {
        let mut bridge: Bridge<Collector> = Bridge::new("b1");
        let a = Arc::new(Mutex::new(Vec::new()));
        bridge.attach(1, Collector(Arc::clone(&a)));
        bridge.detach(1);
        assert!(!bridge.is_attached(1));
        assert!(bridge.is_empty());
    }
}
