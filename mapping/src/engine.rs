// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Match-and-rewrite over a loaded [`MappingDocument`] (spec C6 §4.6).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tera::{Context, Tera};

use crate::document::{self, Children, MappingDocument, StaticMapping, TemplateMapping, TopicLevelNode};
use crate::error::Error;

/// A native callable a mapping template can invoke as `{{ name(arg0=..., arg1=...) }}`.
/// Stands in for the spec's dynamically loaded `{name, arity, callable}` plugin
/// entries — `.so` loading is out of scope, so callers register the Rust
/// functions they want exposed up front via [`Engine::new`]'s `registry`.
pub trait TemplateFunction: Send + Sync {
    /// Expected argument count, or `-1` for variadic.
    fn arity(&self) -> i32;
    fn call(&self, args: &[Value]) -> Result<Value, Error>;
}

struct FunctionAdapter {
    inner: Arc<dyn TemplateFunction>,
}

impl tera::Function for FunctionAdapter {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let mut positional = Vec::with_capacity(args.len());
        let mut index = 0;
        while let Some(value) = args.get(&format!("arg{index}")) {
            positional.push(value.clone());
            index += 1;
        }
        let arity = self.inner.arity();
        if arity >= 0 && positional.len() as i32 != arity {
            return Err(tera::Error::msg(format!(
                "expected {arity} arguments, got {}",
                positional.len()
            )));
        }
        self.inner.call(&positional).map_err(|err| tera::Error::msg(err.to_string()))
    }
}

/// A rewrite emitted by [`Engine::process`]: a topic to publish on, with the
/// rendered payload, the effective QoS and whether it should be retained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rewrite {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

pub struct Engine {
    document: MappingDocument,
    tera: Tera,
}

impl Engine {
    /// Compiles every `value`/`json` template in `document` and registers
    /// the plugin functions named in `document.plugins` from `registry`. A
    /// plugin name absent from `registry` is logged and skipped — the
    /// engine remains usable, per spec §4.6.
    pub fn new(document: MappingDocument, registry: &HashMap<String, Arc<dyn TemplateFunction>>) -> Result<Self, Error> {
        let mut tera = Tera::default();
        if let Some(children) = &document.topic_level {
            register_templates(&mut tera, children, "")?;
        }
        for name in &document.plugins {
            match registry.get(name) {
                Some(function) => {
                    tera.register_function(name, FunctionAdapter { inner: Arc::clone(function) });
                }
                None => log::warn!("mapping plugin '{name}' is not registered; calls to it will fail at render time"),
            }
        }
        Ok(Self { document, tera })
    }

    /// The `(filter, qos)` pairs this document wants subscribed, in the
    /// post-order spec §4.6 defines.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<document::ExtractedSubscription> {
        document::extract_subscriptions(&self.document)
    }

    /// Match-and-rewrite a received publish (spec §4.6 steps 1-5). Returns
    /// an empty list if nothing in the tree matches the topic, the matched
    /// node has no `subscription`, or every candidate rewrite was
    /// suppressed.
    #[must_use]
    pub fn process(&self, topic: &str, payload: &[u8], publisher_qos: u8) -> Vec<Rewrite> {
        let levels: Vec<&str> = topic.split('/').collect();
        let Some(children) = &self.document.topic_level else {
            return Vec::new();
        };
        let Some((path, idx, node)) = match_node(children, &levels, "") else {
            return Vec::new();
        };
        let Some(subscription) = &node.subscription else {
            return Vec::new();
        };

        let mut rewrites = Vec::new();
        if let Some(static_mapping) = &subscription.static_mapping {
            apply_static(static_mapping, payload, publisher_qos, &mut rewrites);
        } else if let Some(template) = &subscription.value {
            if let Err(err) = self.apply_value(&path, idx, template, payload, publisher_qos, &mut rewrites) {
                log::warn!("mapping template render failed for '{path}': {err}");
            }
        } else if let Some(template) = &subscription.json {
            match serde_json::from_slice::<Value>(payload) {
                Ok(parsed) => {
                    if let Err(err) = self.apply_json(&path, idx, template, &parsed, publisher_qos, &mut rewrites) {
                        log::warn!("mapping template render failed for '{path}': {err}");
                    }
                }
                Err(err) => log::warn!("mapping json payload for '{path}' failed to parse: {err}"),
            }
        }
        rewrites
    }

    fn apply_value(
        &self,
        path: &str,
        idx: usize,
        template: &TemplateMapping,
        payload: &[u8],
        publisher_qos: u8,
        rewrites: &mut Vec<Rewrite>,
    ) -> Result<(), Error> {
        let value = String::from_utf8_lossy(payload).into_owned();
        let mut context = Context::new();
        context.insert("value", &value);
        let rendered = self.tera.render(&template_name(path, idx, "value"), &context)?;
        push_rewrite(
            rewrites,
            template.mapped_topic.clone(),
            rendered.into_bytes(),
            template.qos_override,
            publisher_qos,
            template.retain,
            &template.suppressions,
        );
        Ok(())
    }

    fn apply_json(
        &self,
        path: &str,
        idx: usize,
        template: &TemplateMapping,
        parsed: &Value,
        publisher_qos: u8,
        rewrites: &mut Vec<Rewrite>,
    ) -> Result<(), Error> {
        let context = Context::from_serialize(parsed)?;
        let rendered = self.tera.render(&template_name(path, idx, "json"), &context)?;
        push_rewrite(
            rewrites,
            template.mapped_topic.clone(),
            rendered.into_bytes(),
            template.qos_override,
            publisher_qos,
            template.retain,
            &template.suppressions,
        );
        Ok(())
    }
}

fn apply_static(mapping: &StaticMapping, payload: &[u8], publisher_qos: u8, rewrites: &mut Vec<Rewrite>) {
    for entry in mapping.message_mapping.iter() {
        if entry.message.as_bytes() == payload {
            push_rewrite(
                rewrites,
                mapping.mapped_topic.clone(),
                entry.mapped_message.clone().into_bytes(),
                mapping.qos_override,
                publisher_qos,
                mapping.retain_message,
                &mapping.suppressions,
            );
        }
    }
}

/// Effective QoS is `qos_override` if present, else the publisher's QoS. A
/// rewrite whose rendered text is in `suppressions` is dropped unless it is
/// both retained and empty (the explicit "clear the retained message" case).
fn push_rewrite(
    rewrites: &mut Vec<Rewrite>,
    topic: String,
    payload: Vec<u8>,
    qos_override: Option<u8>,
    publisher_qos: u8,
    retain: bool,
    suppressions: &[String],
) {
    let qos = qos_override.unwrap_or(publisher_qos);
    let suppressed = suppressions.iter().any(|s| s.as_bytes() == payload.as_slice());
    let retained_clear = retain && payload.is_empty();
    if suppressed && !retained_clear {
        return;
    }
    rewrites.push(Rewrite { topic, payload, qos, retain });
}

/// `idx` disambiguates siblings that share a `name` (legal: "array children
/// tried in order" implies duplicates are allowed), so each node gets its
/// own compiled template regardless of what its path looks like.
fn template_name(path: &str, idx: usize, kind: &str) -> String {
    format!("{path}#{idx}#{kind}")
}

fn register_templates(tera: &mut Tera, children: &Children, parent_path: &str) -> Result<(), Error> {
    for (idx, node) in children.as_slice().into_iter().enumerate() {
        let path = document::join_path(parent_path, &node.name);
        if let Some(subscription) = &node.subscription {
            if let Some(template) = &subscription.value {
                tera.add_raw_template(&template_name(&path, idx, "value"), &template.mapping_template)?;
            }
            if let Some(template) = &subscription.json {
                tera.add_raw_template(&template_name(&path, idx, "json"), &template.mapping_template)?;
            }
        }
        if let Some(children) = &node.topic_level {
            register_templates(tera, children, &path)?;
        }
    }
    Ok(())
}

/// Walks `topic_levels` down the tree, an object child matching its `name`
/// exactly and array children tried in declaration order — first match
/// wins (spec §4.6 step 1). Returns the matched node's extraction path and
/// sibling index alongside it so callers can look up its compiled templates.
fn match_node<'a>(children: &'a Children, topic_levels: &[&str], parent_path: &str) -> Option<(String, usize, &'a TopicLevelNode)> {
    let (head, rest) = topic_levels.split_first()?;
    for (idx, node) in children.as_slice().into_iter().enumerate() {
        if node.name == *head {
            let path = document::join_path(parent_path, &node.name);
            if rest.is_empty() {
                return Some((path, idx, node));
            }
            return match &node.topic_level {
                Some(grandchildren) => match_node(grandchildren, rest, &path),
                None => None,
            };
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(json: &str) -> Engine {
        let document: MappingDocument = serde_json::from_str(json).unwrap();
        Engine::new(document, &HashMap::new()).unwrap()
    }

    #[test]
    fn static_mapping_rewrites_on_exact_message_match() {
        let e = engine(
            r#"{
                "topic_level": {
                    "name": "switch",
                    "subscription": {
                        "qos": 1,
                        "static": {
                            "mapped_topic": "switch/mapped",
                            "message_mapping": [
                                {"message": "on", "mapped_message": "1"},
                                {"message": "off", "mapped_message": "0"}
                            ]
                        }
                    }
                }
            }"#,
        );
        let rewrites = e.process("switch", b"on", 1);
        assert_eq!(
            rewrites,
            vec![Rewrite { topic: "switch/mapped".to_string(), payload: b"1".to_vec(), qos: 1, retain: false }]
        );
        assert!(e.process("switch", b"unknown", 1).is_empty());
    }

    #[test]
    fn value_template_renders_the_raw_payload() {
        let e = engine(
            r#"{
                "topic_level": {
                    "name": "temp",
                    "subscription": {
                        "qos": 0,
                        "value": {"mapped_topic": "temp/celsius", "mapping_template": "{{ value }}C"}
                    }
                }
            }"#,
        );
        let rewrites = e.process("temp", b"21.5", 0);
        assert_eq!(rewrites[0].topic, "temp/celsius");
        assert_eq!(rewrites[0].payload, b"21.5C");
    }

    #[test]
    fn json_template_uses_parsed_fields_as_context() {
        let e = engine(
            r#"{
                "topic_level": {
                    "name": "sensor",
                    "subscription": {
                        "qos": 0,
                        "json": {"mapped_topic": "sensor/out", "mapping_template": "{{ temperature }}/{{ humidity }}"}
                    }
                }
            }"#,
        );
        let rewrites = e.process("sensor", br#"{"temperature": 21, "humidity": 55}"#, 0);
        assert_eq!(rewrites[0].payload, b"21/55");
    }

    #[test]
    fn malformed_json_payload_is_dropped_not_fatal() {
        let e = engine(
            r#"{
                "topic_level": {
                    "name": "sensor",
                    "subscription": {
                        "qos": 0,
                        "json": {"mapped_topic": "sensor/out", "mapping_template": "{{ temperature }}"}
                    }
                }
            }"#,
        );
        assert!(e.process("sensor", b"not json", 0).is_empty());
    }

    #[test]
    fn suppressed_output_is_dropped_unless_retained_and_empty() {
        let e = engine(
            r#"{
                "topic_level": {
                    "name": "a",
                    "subscription": {
                        "qos": 0,
                        "value": {"mapped_topic": "a/out", "mapping_template": "{{ value }}", "suppressions": [""]}
                    }
                }
            }"#,
        );
        assert!(e.process("a", b"", 0).is_empty());
    }

    #[test]
    fn qos_override_takes_priority_over_publisher_qos() {
        let e = engine(
            r#"{
                "topic_level": {
                    "name": "a",
                    "subscription": {
                        "qos": 0,
                        "value": {"mapped_topic": "a/out", "mapping_template": "{{ value }}", "qos_override": 2}
                    }
                }
            }"#,
        );
        let rewrites = e.process("a", b"x", 0);
        assert_eq!(rewrites[0].qos, 2);
    }

    #[test]
    fn array_children_tried_in_order_first_match_wins() {
        let e = engine(
            r#"{
                "topic_level": [
                    {"name": "a", "subscription": {"qos": 0, "value": {"mapped_topic": "first", "mapping_template": "{{ value }}"}}},
                    {"name": "a", "subscription": {"qos": 0, "value": {"mapped_topic": "second", "mapping_template": "{{ value }}"}}}
                ]
            }"#,
        );
        let rewrites = e.process("a", b"x", 0);
        assert_eq!(rewrites[0].topic, "first");
    }
}
