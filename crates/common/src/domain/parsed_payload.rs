use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One decoded field in the canonical parsed-payload shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedEntry {
    pub key: String,
    #[serde(default)]
    pub value: JsonValue,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Output of a transformation script.
///
/// Scripts conventionally return an ordered array of `{key, value, type, unit}`
/// objects, but any JSON value is stored as returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParsedPayload(JsonValue);

impl ParsedPayload {
    pub fn new(value: JsonValue) -> Self {
        Self(value)
    }

    /// The `lastParsedPayload` handed to a script when no earlier record exists
    pub fn empty_sequence() -> Self {
        Self(JsonValue::Array(Vec::new()))
    }

    pub fn as_value(&self) -> &JsonValue {
        &self.0
    }

    pub fn into_value(self) -> JsonValue {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// `null`, `[]` and `{}` are all empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Null => true,
            JsonValue::Array(items) => items.is_empty(),
            JsonValue::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Entries in canonical shape; array items that are not entries are skipped
    pub fn entries(&self) -> Vec<ParsedEntry> {
        match &self.0 {
            JsonValue::Array(items) => items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// First entry with the given key
    pub fn entry(&self, key: &str) -> Option<ParsedEntry> {
        self.entries().into_iter().find(|entry| entry.key == key)
    }
}

impl From<JsonValue> for ParsedPayload {
    fn from(value: JsonValue) -> Self {
        Self(value)
    }
}
