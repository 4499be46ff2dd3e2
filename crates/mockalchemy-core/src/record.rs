use serde_json::{Map, Value};

/// Field holding the collection-unique identifier.
pub const ID_FIELD: &str = "id";
/// Creation timestamp, immutable once stamped.
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Last-mutation timestamp.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// A single stored record: field name to JSON value.
pub type Record = Map<String, Value>;

/// Returns the record id when present as a string.
pub fn record_id(record: &Record) -> Option<&str> {
    record.get(ID_FIELD).and_then(Value::as_str)
}
