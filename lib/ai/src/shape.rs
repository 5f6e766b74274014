//! Advisory output schemas.
//!
//! A [`ShapeDescriptor`] is sent along with a request to ask the service for
//! a particular structure. The service may ignore it, so the extractor only
//! uses it as a hint and still parses and checks the text itself.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};

/// Top-level kind a shape asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Object,
    Array,
    Other,
}

impl ShapeKind {
    /// Lowercase name used in messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::Other => "value",
        }
    }
}

/// A schema hint in the service's `responseSchema` format.
///
/// Type names may be upper- or lowercase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeDescriptor(JsonValue);

impl ShapeDescriptor {
    /// Wraps an existing schema document.
    #[must_use]
    pub fn from_schema(schema: JsonValue) -> Self {
        Self(schema)
    }

    /// A string field.
    #[must_use]
    pub fn string(description: &str) -> Self {
        Self(json!({ "type": "STRING", "description": description }))
    }

    /// An integer field.
    #[must_use]
    pub fn integer(description: &str) -> Self {
        Self(json!({ "type": "INTEGER", "description": description }))
    }

    /// An array of `items`.
    #[must_use]
    pub fn array(items: ShapeDescriptor) -> Self {
        Self(json!({ "type": "ARRAY", "items": items.0 }))
    }

    /// An object whose listed properties are all required.
    #[must_use]
    pub fn object<'a>(properties: impl IntoIterator<Item = (&'a str, ShapeDescriptor)>) -> Self {
        let mut props = Map::new();
        let mut required = Vec::new();
        for (name, shape) in properties {
            required.push(JsonValue::String(name.to_string()));
            props.insert(name.to_string(), shape.0);
        }
        Self(json!({
            "type": "OBJECT",
            "properties": props,
            "required": required,
        }))
    }

    /// The top-level kind this shape asks for.
    #[must_use]
    pub fn kind(&self) -> ShapeKind {
        match self.0.get("type").and_then(JsonValue::as_str) {
            Some(t) if t.eq_ignore_ascii_case("array") => ShapeKind::Array,
            Some(t) if t.eq_ignore_ascii_case("object") => ShapeKind::Object,
            _ => ShapeKind::Other,
        }
    }

    /// Whether the shape asks for a top-level array.
    #[must_use]
    pub fn expects_array(&self) -> bool {
        self.kind() == ShapeKind::Array
    }

    /// The schema document to send to the service.
    #[must_use]
    pub fn as_schema(&self) -> &JsonValue {
        &self.0
    }
}
