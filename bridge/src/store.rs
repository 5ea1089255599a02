// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Bridge config loading: one JSON document maps connection descriptors to
//! the set of peer broker `instance_name`s they bridge to (spec C7).

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{Error, ErrorKind};

#[derive(Clone, Debug, Deserialize)]
pub struct BridgeConfigFile {
    pub bridges: Vec<BridgeEntry>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BridgeEntry {
    pub connection: BridgeConnection,
    pub brokers: Vec<BrokerDescriptor>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BridgeConnection {
    pub client_id: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u16,
    #[serde(default)]
    pub clean_session: bool,
    pub will_topic: Option<String>,
    pub will_message: Option<String>,
    #[serde(default)]
    pub will_qos: u8,
    #[serde(default)]
    pub will_retain: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    /// When true, the transport adapter that brings this connection up
    /// should stamp a no-local flag if the peer broker supports one.
    /// Absent that support, "exclude origin" in [`crate::bridge::Bridge`]
    /// is what actually prevents loops (spec §4.7).
    #[serde(default)]
    pub loop_prevention: bool,
}

const fn default_keep_alive() -> u16 {
    60
}

#[derive(Clone, Debug, Deserialize)]
pub struct BrokerDescriptor {
    pub instance_name: String,
    pub protocol: String,
    pub encryption: String,
    pub transport: String,
    #[serde(default)]
    pub topics: Vec<BridgeTopic>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BridgeTopic {
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
}

/// Maps each broker endpoint's `instance_name` to the [`BrokerDescriptor`]
/// and the identity (connection `client_id`) of the bridge that owns it, so
/// a publish arriving on one endpoint can be forwarded to every other
/// endpoint sharing the same bridge identity without touching itself.
#[derive(Debug)]
pub struct BridgeStore {
    brokers: HashMap<String, BrokerDescriptor>,
    bridge_of: HashMap<String, String>,
    connections: HashMap<String, BridgeConnection>,
}

impl BridgeStore {
    /// Validate `raw` against the bridge config schema, then build the
    /// lookup tables. A failed endpoint definition does not prevent the
    /// others in the same document from loading (spec §4.7's "a failed
    /// endpoint does not block the bridge" is honored at bring-up time by
    /// [`BridgeStore::brokers`] returning every entry that *did* parse).
    pub fn load_and_validate(raw: &str) -> Result<Self, Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let schema = schema();
        let compiled = jsonschema::JSONSchema::compile(&schema)
            .map_err(|err| Error::new(ErrorKind::SchemaInvalid, err.to_string()))?;
        if let Err(errors) = compiled.validate(&value) {
            let message = errors.map(|err| err.to_string()).collect::<Vec<_>>().join("; ");
            return Err(Error::new(ErrorKind::SchemaInvalid, message));
        }
        let file: BridgeConfigFile = serde_json::from_value(value)?;

        let mut brokers = HashMap::new();
        let mut bridge_of = HashMap::new();
        let mut connections = HashMap::new();
        for entry in file.bridges {
            connections.insert(entry.connection.client_id.clone(), entry.connection.clone());
            for broker in entry.brokers {
                bridge_of.insert(broker.instance_name.clone(), entry.connection.client_id.clone());
                brokers.insert(broker.instance_name.clone(), broker);
            }
        }
        Ok(Self { brokers, bridge_of, connections })
    }

    #[must_use]
    pub fn broker(&self, instance_name: &str) -> Option<&BrokerDescriptor> {
        self.brokers.get(instance_name)
    }

    #[must_use]
    pub fn brokers(&self) -> impl Iterator<Item = &BrokerDescriptor> {
        self.brokers.values()
    }

    #[must_use]
    pub fn bridge_identity(&self, instance_name: &str) -> Option<&str> {
        self.bridge_of.get(instance_name).map(String::as_str)
    }

    #[must_use]
    pub fn connection(&self, bridge_identity: &str) -> Option<&BridgeConnection> {
        self.connections.get(bridge_identity)
    }
}

fn schema() -> serde_json::Value {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["bridges"],
        "properties": {
            "bridges": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["connection", "brokers"],
                    "properties": {
                        "connection": {
                            "type": "object",
                            "required": ["client_id"],
                            "properties": {"client_id": {"type": "string"}}
                        },
                        "brokers": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["instance_name", "protocol", "encryption", "transport"],
                                "properties": {
                                    "instance_name": {"type": "string"},
                                    "protocol": {"type": "string"},
                                    "encryption": {"type": "string"},
                                    "transport": {"type": "string"},
                                    "topics": {
                                        "type": "array",
                                        "items": {
                                            "type": "object",
                                            "required": ["topic"],
                                            "properties": {
                                                "topic": {"type": "string"},
                                                "qos": {"type": "integer", "minimum": 0, "maximum": 2}
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "bridges": [
            {
                "connection": {"client_id": "bridge-1"},
                "brokers": [
                    {"instance_name": "east", "protocol": "mqtt", "encryption": "none", "transport": "tcp",
                     "topics": [{"topic": "sensors/#", "qos": 1}]},
                    {"instance_name": "west", "protocol": "mqtt", "encryption": "tls", "transport": "tcp"}
                ]
            }
        ]
    }"#;

    #[test]
    fn loads_brokers_and_their_shared_bridge_identity() {
        let store = BridgeStore::load_and_validate(CONFIG).unwrap();
        assert_eq!(store.bridge_identity("east"), Some("bridge-1"));
        assert_eq!(store.bridge_identity("west"), Some("bridge-1"));
        assert_eq!(store.broker("east").unwrap().topics[0].topic, "sensors/#");
        assert_eq!(store.connection("bridge-1").unwrap().keep_alive, 60);
    }

    #[test]
    fn rejects_a_broker_missing_its_transport() {
        let err = BridgeStore::load_and_validate(
            r#"{"bridges": [{"connection": {"client_id": "b"}, "brokers": [{"instance_name": "x", "protocol": "mqtt", "encryption": "none"}]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::SchemaInvalid));
    }
}
