//! Metadata codec
//!
//! The registry stores image properties as flat strings. A few known
//! properties hold ordered lists of small records (`mappings`,
//! `block_device_mapping`); those travel as JSON text and are parsed back on
//! the way in. Object keys are serialized in sorted order, so the encoding of
//! a given value is always the same string.

use serde_json::{Map, Value};
use tracing::debug;

/// Properties whose list-of-records values are carried as JSON text
pub const ENCODED_PROPERTIES: [&str; 2] = ["mappings", "block_device_mapping"];

/// Key of the nested property map inside an image record
const PROPERTIES_KEY: &str = "properties";

/// Flatten the recognized nested properties of an image record.
pub fn encode(metadata: &Map<String, Value>) -> Map<String, Value> {
    transform_properties(metadata, encode_properties)
}

/// Restore the recognized nested properties of an image record.
pub fn decode(metadata: &Map<String, Value>) -> Map<String, Value> {
    transform_properties(metadata, decode_properties)
}

/// Serialize each recognized list-valued property to its canonical text.
/// Every other key passes through untouched.
pub fn encode_properties(properties: &Map<String, Value>) -> Map<String, Value> {
    let mut out = properties.clone();
    for key in ENCODED_PROPERTIES {
        if let Some(value @ Value::Array(_)) = properties.get(key) {
            out.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
    out
}

/// Parse each recognized string-valued property back into its list form.
///
/// A value that is already structured, or whose text is not a JSON list, is
/// left as it is.
pub fn decode_properties(properties: &Map<String, Value>) -> Map<String, Value> {
    let mut out = properties.clone();
    for key in ENCODED_PROPERTIES {
        let Some(Value::String(text)) = properties.get(key) else {
            continue;
        };
        match serde_json::from_str::<Value>(text) {
            Ok(list @ Value::Array(_)) => {
                out.insert(key.to_string(), list);
            }
            Ok(_) | Err(_) => {
                debug!(property = key, "Property is not an encoded list, leaving as-is");
            }
        }
    }
    out
}

fn transform_properties(
    metadata: &Map<String, Value>,
    f: fn(&Map<String, Value>) -> Map<String, Value>,
) -> Map<String, Value> {
    let mut out = metadata.clone();
    if let Some(Value::Object(properties)) = metadata.get(PROPERTIES_KEY) {
        out.insert(PROPERTIES_KEY.to_string(), Value::Object(f(properties)));
    }
    out
}
