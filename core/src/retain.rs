// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Retained message store (spec C3): one message per exact topic name,
//! matched against a new subscription's filter with the same
//! [`codec::TopicFilter::matches`] table used for live dispatch.

use std::collections::HashMap;

use codec::{QoS, TopicFilter, TopicName};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedMessage {
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// Retained-message store. A publish with an empty payload deletes the
/// retained message for its topic instead of storing one (MQTT-3.3.1-10).
#[derive(Default)]
pub struct RetainTable {
    messages: HashMap<String, RetainedMessage>,
}

impl RetainTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or delete the retained message for `topic`.
    ///
    /// `payload.is_empty()` deletes any previously retained message.
    pub fn put(&mut self, topic: &TopicName, payload: Vec<u8>, qos: QoS) {
        if payload.is_empty() {
            self.messages.remove(topic.as_str());
        } else {
            self.messages
                .insert(topic.as_str().to_string(), RetainedMessage { payload, qos });
        }
    }

    /// Every retained message whose topic matches `filter`, for delivery
    /// immediately after a SUBSCRIBE is acknowledged (spec §4.4).
    #[must_use]
    pub fn matching(&self, filter: &TopicFilter) -> Vec<(TopicName, RetainedMessage)> {
        self.messages
            .iter()
            .filter_map(|(topic_str, message)| {
                let topic = TopicName::parse(topic_str).ok()?;
                filter.matches(&topic).then(|| (topic, message.clone()))
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(s: &str) -> TopicName {
        TopicName::parse(s).unwrap()
    }

    fn filter(s: &str) -> TopicFilter {
        TopicFilter::parse(s).unwrap()
    }

    #[test]
    fn stores_and_matches_a_retained_message() {
        let mut table = RetainTable::new();
        table.put(&topic("a/b"), b"hello".to_vec(), QoS::AtLeastOnce);

        let hits = table.matching(&filter("a/+"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1.payload, b"hello");
    }

    #[test]
    fn empty_payload_deletes_the_retained_message() {
        let mut table = RetainTable::new();
        table.put(&topic("a/b"), b"hello".to_vec(), QoS::AtMostOnce);
        table.put(&topic("a/b"), Vec::new(), QoS::AtMostOnce);

        assert!(table.matching(&filter("a/b")).is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn bare_hash_excludes_sys_topics() {
        let mut table = RetainTable::new();
        table.put(&topic("$SYS/uptime"), b"1".to_vec(), QoS::AtMostOnce);
        table.put(&topic("a/b"), b"2".to_vec(), QoS::AtMostOnce);

        let hits = table.matching(&filter("#"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.as_str(), "a/b");
    }
}
