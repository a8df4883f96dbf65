//! JSON bodies of revisions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{Error, Result},
    rev_id::RevisionId,
};

/// Top level keys with a meaning to the database. They are never stored as
/// part of a body. Any other key starting with `_` is rejected.
pub const SPECIAL_KEYS: &[&str] = &[
    "_id",
    "_rev",
    "_attachments",
    "_deleted",
    "_revisions",
    "_revs_info",
    "_conflicts",
    "_deleted_conflicts",
];

/// A JSON object, the content of a revision.
///
/// Keys are kept sorted, so [`Body::to_canonical_bytes`] produces the same
/// bytes for equal bodies on every replica.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Body(Map<String, Value>);

/// The special properties removed from a body by [`Body::split_special`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecialProperties {
    /// `_id`
    pub id: Option<String>,
    /// `_rev`
    pub rev: Option<RevisionId>,
    /// `_deleted`
    pub deleted: bool,
    /// `_attachments`
    pub attachments: Option<Map<String, Value>>,
    /// `_revisions`
    pub revisions: Option<Value>,
}

impl Body {
    /// An empty object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::bad_request(format!(
                "document body must be a JSON object, got {other}"
            ))),
        }
    }

    /// Parse a body from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes).map_err(Error::bad_request)?;
        Self::from_value(value)
    }

    /// The canonical encoding: compact JSON with keys sorted at every level.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(&self.0).map_err(anyhow::Error::from)?;
        Ok(bytes)
    }

    /// Get a property.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a property, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a property.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Whether the object has no properties.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// The underlying JSON map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Separate the special `_` properties from the user properties.
    ///
    /// Fails for unknown `_` keys and for special keys of the wrong type.
    pub fn split_special(mut self) -> Result<(Body, SpecialProperties)> {
        if let Some(key) = self
            .0
            .keys()
            .find(|k| k.starts_with('_') && !SPECIAL_KEYS.contains(&k.as_str()))
        {
            return Err(Error::bad_request(format!("invalid special property {key:?}")));
        }
        let mut special = SpecialProperties::default();
        if let Some(id) = self.0.remove("_id") {
            match id {
                Value::String(id) => special.id = Some(id),
                other => return Err(Error::bad_request(format!("invalid _id {other}"))),
            }
        }
        if let Some(rev) = self.0.remove("_rev") {
            match rev {
                Value::String(rev) => special.rev = Some(RevisionId::parse(&rev)?),
                other => return Err(Error::bad_request(format!("invalid _rev {other}"))),
            }
        }
        if let Some(deleted) = self.0.remove("_deleted") {
            match deleted {
                Value::Bool(deleted) => special.deleted = deleted,
                other => return Err(Error::bad_request(format!("invalid _deleted {other}"))),
            }
        }
        if let Some(attachments) = self.0.remove("_attachments") {
            match attachments {
                Value::Object(map) => special.attachments = Some(map),
                other => return Err(Error::bad_request(format!("invalid _attachments {other}"))),
            }
        }
        special.revisions = self.0.remove("_revisions");
        // computed on read, never stored
        self.0.remove("_revs_info");
        self.0.remove("_conflicts");
        self.0.remove("_deleted_conflicts");
        Ok((self, special))
    }
}

impl From<Map<String, Value>> for Body {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

impl TryFrom<Value> for Body {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}
