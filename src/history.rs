//! The `_revisions` history format exchanged with replication peers.
//!
//! A history is a list of revision ids, newest first. When the generations
//! form an unbroken descending run it is encoded compactly as
//! `{"start": 3, "ids": ["ccc", "bbb", "aaa"]}`, otherwise every id is
//! written out in full: `{"ids": ["3-ccc", "1-aaa"]}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{Error, Result},
    rev_id::{Generation, MalformedRevisionId, RevisionId},
};

/// Encoded revision history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionHistory {
    /// Generation of the first id, present in the compact form only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<Generation>,
    /// Digests (compact form) or full revision ids.
    pub ids: Vec<String>,
}

impl RevisionHistory {
    /// Encode a newest-first list of revision ids.
    pub fn new(history: &[RevisionId]) -> Self {
        let Some(first) = history.first() else {
            return Self::default();
        };
        let start = first.generation();
        let contiguous = history.iter().enumerate().all(|(i, id)| {
            u32::try_from(i).is_ok_and(|i| start.checked_sub(i) == Some(id.generation()))
        });
        if contiguous {
            Self {
                start: Some(start),
                ids: history.iter().map(|id| id.digest().to_string()).collect(),
            }
        } else {
            Self {
                start: None,
                ids: history.iter().map(ToString::to_string).collect(),
            }
        }
    }

    /// Decode into the newest-first list of revision ids.
    pub fn revision_ids(&self) -> Result<Vec<RevisionId>, MalformedRevisionId> {
        match self.start {
            Some(start) => self
                .ids
                .iter()
                .enumerate()
                .map(|(i, digest)| {
                    let generation = u32::try_from(i)
                        .ok()
                        .and_then(|i| start.checked_sub(i))
                        .ok_or_else(|| MalformedRevisionId(format!("{start}-{digest}")))?;
                    RevisionId::new(generation, digest.as_str())
                })
                .collect(),
            None => self.ids.iter().map(|id| RevisionId::parse(id)).collect(),
        }
    }

    /// Parse from a JSON value such as the `_revisions` property of a body.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|err| Error::bad_request(format!("invalid revision history: {err}")))
    }

    /// Convert to a JSON value.
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        if let Some(start) = self.start {
            map.insert("start".into(), start.into());
        }
        map.insert("ids".into(), self.ids.clone().into());
        Value::Object(map)
    }
}

/// Decode either history form from a JSON value into revision ids.
pub fn parse(value: Value) -> Result<Vec<RevisionId>> {
    Ok(RevisionHistory::from_value(value)?.revision_ids()?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ids(ids: &[&str]) -> Vec<RevisionId> {
        ids.iter().map(|s| RevisionId::parse(s).unwrap()).collect()
    }

    #[test]
    fn compact_form() {
        let history = ids(&["3-ccc", "2-bbb", "1-aaa"]);
        let encoded = RevisionHistory::new(&history);
        assert_eq!(encoded.to_value(), json!({"start": 3, "ids": ["ccc", "bbb", "aaa"]}));
        assert_eq!(encoded.revision_ids().unwrap(), history);
    }

    #[test]
    fn full_form_for_gaps() {
        let history = ids(&["5-eee", "2-bbb"]);
        let encoded = RevisionHistory::new(&history);
        assert_eq!(encoded.to_value(), json!({"ids": ["5-eee", "2-bbb"]}));
        assert_eq!(encoded.revision_ids().unwrap(), history);
    }

    #[test]
    fn empty() {
        let encoded = RevisionHistory::new(&[]);
        assert_eq!(encoded.to_value(), json!({"ids": []}));
        assert!(encoded.revision_ids().unwrap().is_empty());
    }

    #[test]
    fn decode_both_forms() {
        assert_eq!(
            parse(json!({"start": 2, "ids": ["ccc", "aaa"]})).unwrap(),
            ids(&["2-ccc", "1-aaa"])
        );
        assert_eq!(
            parse(json!({"ids": ["7-x", "3-y"]})).unwrap(),
            ids(&["7-x", "3-y"])
        );
    }

    #[test]
    fn decode_rejects_bad_input() {
        // generation would drop to zero
        assert!(parse(json!({"start": 1, "ids": ["b", "a"]})).is_err());
        assert!(parse(json!({"ids": ["nope"]})).is_err());
        assert!(parse(json!({"start": "1"})).is_err());
        assert!(parse(json!([1, 2])).is_err());
    }
}
