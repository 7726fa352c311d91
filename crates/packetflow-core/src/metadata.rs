//! Handler-attached per-connection metadata.

use std::collections::HashMap;

/// Value stored in [`crate::Connection`]'s metadata map.
///
/// A sum type rather than a fully dynamic/`Any` value: handlers attach a
/// small, closed set of shapes, and callers pattern-match rather than
/// downcast.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// A signed integer.
    Int(i64),
    /// UTF-8 text.
    Text(String),
    /// A boolean flag.
    Bool(bool),
}

impl From<Vec<u8>> for MetadataValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Key under which [`crate::Connection::disconnect`] records its reason.
pub const DISCONNECT_REASON_KEY: &str = "disconnect_reason";

/// String-keyed metadata map attached to a connection.
pub type Metadata = HashMap<String, MetadataValue>;
