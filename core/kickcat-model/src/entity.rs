use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::{SchemaError, SchemaResult, hash};

/// An immutable snapshot of one record's fields.
///
/// Cloning is cheap: snapshots share their field map. Every "mutation"
/// (`with`, `without`, `with_changes`) builds a new snapshot and leaves the
/// original untouched, so a snapshot handed out is never observed changing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(Arc<Map<String, Value>>);

impl Entity {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(Arc::new(fields))
    }

    /// Builds a snapshot from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> SchemaResult<Self> {
        match value {
            Value::Object(fields) => Ok(Self::new(fields)),
            other => Err(SchemaError::NotAnObject(other.to_string())),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Extract a string field.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Extract an integer field.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a snapshot with `name` set to `value`.
    #[must_use]
    pub fn with(&self, name: impl Into<String>, value: Value) -> Self {
        let mut fields = (*self.0).clone();
        fields.insert(name.into(), value);
        Self::new(fields)
    }

    /// Returns a snapshot without `name`.
    #[must_use]
    pub fn without(&self, name: &str) -> Self {
        if !self.contains(name) {
            return self.clone();
        }
        let mut fields = (*self.0).clone();
        fields.remove(name);
        Self::new(fields)
    }

    /// Shallow-merges `changes` over this snapshot.
    #[must_use]
    pub fn with_changes(&self, changes: &Map<String, Value>) -> Self {
        let mut fields = (*self.0).clone();
        for (name, value) in changes {
            fields.insert(name.clone(), value.clone());
        }
        Self::new(fields)
    }

    /// Content hash of this snapshot. See [`hash::hash`].
    pub fn hash(&self) -> String {
        hash::hash_fields(&self.0)
    }

    pub fn to_value(&self) -> Value {
        Value::Object((*self.0).clone())
    }
}

impl From<Map<String, Value>> for Entity {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

impl TryFrom<Value> for Entity {
    type Error = SchemaError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}
