//! Column type registry.
//!
//! Maps declared type names (`"text"`, `"json"`, ...) to storage metadata.
//! The registry is built once and handed to validators by reference; there is
//! no process-wide instance.

use std::collections::BTreeMap;

use serde_json::Value;

/// Storage metadata for one column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Declared name, the key callers use in column definitions.
    pub name: &'static str,
    /// Physical SQL type used in DDL.
    pub sql_type: &'static str,
    /// Values are stored as JSON text and must be encoded on write and
    /// decoded on read.
    pub text_codec: bool,
}

const BUILTIN: &[TypeInfo] = &[
    TypeInfo { name: "text", sql_type: "TEXT", text_codec: false },
    TypeInfo { name: "int", sql_type: "BIGINT", text_codec: false },
    TypeInfo { name: "float", sql_type: "DOUBLE PRECISION", text_codec: false },
    TypeInfo { name: "bool", sql_type: "BOOLEAN", text_codec: false },
    TypeInfo { name: "date", sql_type: "DATE", text_codec: false },
    TypeInfo { name: "datetime", sql_type: "TIMESTAMP", text_codec: false },
    TypeInfo { name: "json", sql_type: "TEXT", text_codec: true },
    TypeInfo { name: "file", sql_type: "TEXT", text_codec: true },
];

/// Immutable lookup of known column types.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: BTreeMap<&'static str, TypeInfo>,
}

impl TypeRegistry {
    /// The built-in type set.
    pub fn builtin() -> Self {
        Self::from_types(BUILTIN.iter().cloned())
    }

    /// Build a registry from an explicit type list. Later entries win on
    /// duplicate names.
    pub fn from_types(types: impl IntoIterator<Item = TypeInfo>) -> Self {
        Self {
            types: types.into_iter().map(|t| (t.name, t)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&TypeInfo> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Known type names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.types.keys().copied()
    }

    /// Prepare a value for storage.
    ///
    /// Every non-null value of a text-codec type is serialized to its JSON
    /// text, strings included, so `decode` gives back the same value. Other
    /// types pass through.
    pub fn encode(&self, type_name: &str, value: Value) -> Value {
        match self.get(type_name) {
            Some(info) if info.text_codec && !value.is_null() => Value::String(value.to_string()),
            _ => value,
        }
    }

    /// Rehydrate a stored value.
    ///
    /// Text-codec types are parsed from their JSON text. A value that fails
    /// to parse is returned unchanged rather than failing the read.
    pub fn decode(&self, type_name: &str, stored: Value) -> Value {
        match (self.get(type_name), stored) {
            (Some(info), Value::String(raw)) if info.text_codec => {
                match serde_json::from_str::<Value>(&raw) {
                    Ok(decoded) => decoded,
                    Err(_) => Value::String(raw),
                }
            }
            (_, stored) => stored,
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
