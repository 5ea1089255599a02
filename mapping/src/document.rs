// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The mapping document's shape: a `topic_level` tree whose nodes carry an
//! optional `subscription`, per spec C6.

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct MappingDocument {
    #[serde(default)]
    pub plugins: Vec<String>,
    pub topic_level: Option<Children>,
}

/// A node's children: either one object, or an array tried in declaration
/// order (spec C6 match step: "array children are tried in order, first
/// match wins").
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum Children {
    One(Box<TopicLevelNode>),
    Many(Vec<TopicLevelNode>),
}

impl Children {
    pub(crate) fn as_slice(&self) -> Vec<&TopicLevelNode> {
        match self {
            Children::One(node) => vec![node.as_ref()],
            Children::Many(nodes) => nodes.iter().collect(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TopicLevelNode {
    pub name: String,
    pub topic_level: Option<Children>,
    pub subscription: Option<Subscription>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub qos: u8,
    #[serde(rename = "static")]
    pub static_mapping: Option<StaticMapping>,
    pub value: Option<TemplateMapping>,
    pub json: Option<TemplateMapping>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        match self {
            OneOrMany::One(v) => std::slice::from_ref(v).iter(),
            OneOrMany::Many(vs) => vs.iter(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct StaticMapping {
    pub mapped_topic: String,
    #[serde(default)]
    pub retain_message: bool,
    pub message_mapping: OneOrMany<MessageMappingEntry>,
    pub qos_override: Option<u8>,
    #[serde(default)]
    pub suppressions: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MessageMappingEntry {
    pub message: String,
    pub mapped_message: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TemplateMapping {
    pub mapped_topic: String,
    pub mapping_template: String,
    #[serde(default)]
    pub retain: bool,
    pub qos_override: Option<u8>,
    #[serde(default)]
    pub suppressions: Vec<String>,
}

/// One `(concatenated topic filter, qos)` pair discovered by
/// [`crate::engine::Engine::extract_subscriptions`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedSubscription {
    pub filter: String,
    pub qos: u8,
}

/// Join a node's name onto its parent's path per spec C6's concatenation
/// rule: `/`-joined, except when `parent` is empty or exactly `/`, in which
/// case no separator is inserted.
#[must_use]
pub fn join_path(parent: &str, name: &str) -> String {
    if name.is_empty() {
        return parent.to_string();
    }
    if parent.is_empty() || parent == "/" {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Post-order traversal yielding `(path, qos)` for every node that carries a
/// `subscription` (spec C6).
pub fn extract_subscriptions(document: &MappingDocument) -> Vec<ExtractedSubscription> {
    let mut out = Vec::new();
    if let Some(children) = &document.topic_level {
        for node in children.as_slice() {
            walk(node, "", &mut out);
        }
    }
    out
}

fn walk(node: &TopicLevelNode, parent_path: &str, out: &mut Vec<ExtractedSubscription>) {
    let path = join_path(parent_path, &node.name);
    if let Some(children) = &node.topic_level {
        for child in children.as_slice() {
            walk(child, &path, out);
        }
    }
    if let Some(subscription) = &node.subscription {
        out.push(ExtractedSubscription {
            filter: path,
            qos: subscription.qos,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: &str) -> MappingDocument {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn concatenation_rule_skips_separator_at_root() {
        assert_eq!(join_path("", "a"), "a");
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("a", "b"), "a/b");
    }

    #[test]
    fn extracts_every_subscription_post_order() {
        let document = doc(
            r#"{
                "topic_level": {
                    "name": "a",
                    "topic_level": {
                        "name": "b",
                        "subscription": {"qos": 1, "static": {"mapped_topic": "x", "message_mapping": {"message": "on", "mapped_message": "1"}}}
                    }
                }
            }"#,
        );
        let subs = extract_subscriptions(&document);
        assert_eq!(subs, vec![ExtractedSubscription { filter: "a/b".to_string(), qos: 1 }]);
    }
}
