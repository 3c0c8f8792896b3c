//! Content hashing for entity snapshots.
//!
//! The digest is taken over a canonical string form of the value: object
//! fields in key order, array items in position order, joined by `|`.
//! Two structurally equal values hash identically regardless of the order
//! their object keys were inserted in.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

const DELIMITER: &str = "|";

/// Token for a value that is not there at all.
pub const ABSENT_TOKEN: &str = "~absent";
/// Token for JSON `null`.
pub const NULL_TOKEN: &str = "~null";
/// Token for an empty string, array or object.
pub const EMPTY_TOKEN: &str = "~empty";

/// Hashes an optional value; `None` hashes as the absent token.
pub fn hash(value: Option<&Value>) -> String {
    digest(&stringify(value))
}

/// Hashes an object's fields as if they were a `Value::Object`.
pub fn hash_fields(fields: &Map<String, Value>) -> String {
    digest(&stringify_object(fields))
}

fn digest(canonical: &str) -> String {
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Canonical string form used as hash input.
pub fn stringify(value: Option<&Value>) -> String {
    match value {
        None => ABSENT_TOKEN.to_string(),
        Some(Value::Null) => NULL_TOKEN.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if s.is_empty() => EMPTY_TOKEN.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) if items.is_empty() => format!("[{EMPTY_TOKEN}]"),
        Some(Value::Array(items)) => {
            let parts: Vec<String> = items.iter().map(|item| stringify(Some(item))).collect();
            format!("[{}]", parts.join(DELIMITER))
        }
        Some(Value::Object(fields)) => stringify_object(fields),
    }
}

fn stringify_object(fields: &Map<String, Value>) -> String {
    if fields.is_empty() {
        return format!("{{{EMPTY_TOKEN}}}");
    }

    let mut keys: Vec<&String> = fields.keys().collect();
    keys.sort();

    let parts: Vec<String> = keys
        .into_iter()
        .map(|key| format!("{key}:{}", stringify(fields.get(key))))
        .collect();
    format!("{{{}}}", parts.join(DELIMITER))
}
