// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic-tree rewrite rules: a JSON mapping document, validated against a
//! schema, rendered through [`tera`] templates as publishes flow through it.

pub mod document;
pub mod engine;
pub mod error;

pub use document::{ExtractedSubscription, MappingDocument};
pub use engine::{Engine, Rewrite, TemplateFunction};
pub use error::{Error, ErrorKind};

/// Parse and schema-validate a mapping document. A document that fails
/// either step yields an error; per spec §7.4 the caller should fall back
/// to an empty, still-usable mapping rather than aborting.
pub fn parse_document(raw: &str) -> Result<MappingDocument, Error> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let schema = schema();
    let compiled = jsonschema::JSONSchema::compile(&schema)
        .map_err(|err| Error::new(ErrorKind::SchemaInvalid, err.to_string()))?;
    if let Err(errors) = compiled.validate(&value) {
        let message = errors.map(|err| err.to_string()).collect::<Vec<_>>().join("; ");
        return Err(Error::new(ErrorKind::SchemaInvalid, message));
    }
    Ok(serde_json::from_value(value)?)
}

/// The draft-07 schema documents are validated against, exposed for the
/// admin API's `GET /schema` endpoint.
#[must_use]
pub fn document_schema_value() -> serde_json::Value {
    schema()
}

fn schema() -> serde_json::Value {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "plugins": {"type": "array", "items": {"type": "string"}},
            "topic_level": {"$ref": "#/definitions/node_or_array"}
        },
        "definitions": {
            "node_or_array": {
                "oneOf": [
                    {"$ref": "#/definitions/node"},
                    {"type": "array", "items": {"$ref": "#/definitions/node"}}
                ]
            },
            "node": {
                "type": "object",
                "required": ["name"],
                "properties": {
                    "name": {"type": "string"},
                    "topic_level": {"$ref": "#/definitions/node_or_array"},
                    "subscription": {
                        "type": "object",
                        "properties": {
                            "qos": {"type": "integer", "minimum": 0, "maximum": 2},
                            "static": {"type": "object"},
                            "value": {"type": "object"},
                            "json": {"type": "object"}
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
    use std::collections::HashMap;

    #[test]
    fn parses_a_well_formed_document() {
        let document = parse_document(
            r#"{
                "topic_level": {
                    "name": "home",
                    "topic_level": {
                        "name": "light",
                        "subscription": {"qos": 0, "value": {"mapped_topic": "home/light/state", "mapping_template": "{{ value }}"}}
                    }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(document.plugins.len(), 0);
        let engine = Engine::new(document, &HashMap::new()).unwrap();
        assert_eq!(engine.subscriptions()[0].filter, "home/light");
    }

    #[test]
    fn rejects_a_node_missing_its_name() {
        let err = parse_document(r#"{"topic_level": {"subscription": {"qos": 0}}}"#).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::SchemaInvalid));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse_document("not json").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MalformedDocument));
    }
}
