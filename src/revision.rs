//! Revisions, revision lists and document change events.

use serde_json::Value;
use url::Url;

use crate::{
    body::Body,
    error::{Error, Result},
    rev_id::RevisionId,
    store::StoredRevision,
};

/// Database-wide insertion counter of a revision row.
pub type Sequence = u64;

/// Store-local numeric id of a document.
pub type DocNumericId = u64;

/// Prefix of design document ids, the only ids allowed to start with `_`.
pub const DESIGN_DOC_PREFIX: &str = "_design/";

/// Whether `doc_id` may be used as a document id.
pub fn is_valid_doc_id(doc_id: &str) -> bool {
    if doc_id.is_empty() {
        false
    } else if doc_id.starts_with('_') {
        doc_id.starts_with(DESIGN_DOC_PREFIX)
    } else {
        true
    }
}

pub(crate) fn validate_doc_id(doc_id: &str) -> Result<()> {
    if is_valid_doc_id(doc_id) {
        Ok(())
    } else {
        Err(Error::bad_request(format!("invalid document id {doc_id:?}")))
    }
}

/// A stored revision of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    /// Id of the document.
    pub doc_id: String,
    /// Id of the revision.
    pub rev_id: RevisionId,
    /// Whether this revision is a deletion (tombstone).
    pub deleted: bool,
    /// Sequence assigned on insert.
    pub sequence: Sequence,
    /// Sequence of the parent revision, `None` for the root or when the
    /// parent has been pruned away.
    pub parent_sequence: Option<Sequence>,
    /// Whether this revision is a leaf of the tree.
    pub current: bool,
    /// Whether the body declared attachments.
    pub has_attachments: bool,
    /// The body, `None` for stubs.
    pub body: Option<Body>,
}

impl Revision {
    pub(crate) fn from_stored(
        doc_id: &str,
        sequence: Sequence,
        row: StoredRevision,
    ) -> Result<Self> {
        let body = row.body.as_deref().map(Body::from_slice).transpose().map_err(|err| {
            anyhow::anyhow!("corrupt body for {doc_id} sequence {sequence}: {err}")
        })?;
        Ok(Self {
            doc_id: doc_id.to_string(),
            rev_id: row.rev_id,
            deleted: row.deleted,
            sequence,
            parent_sequence: row.parent,
            current: row.current,
            has_attachments: row.has_attachments,
            body,
        })
    }

    /// Generation of this revision.
    pub fn generation(&self) -> u32 {
        self.rev_id.generation()
    }

    /// Whether this is a stub, a placeholder kept only to preserve ancestry.
    pub fn is_stub(&self) -> bool {
        self.body.is_none()
    }

    /// The body with `_id`, `_rev` and `_deleted` added, as returned to
    /// callers. `None` for stubs.
    pub fn properties(&self) -> Option<Body> {
        let mut body = self.body.clone()?;
        body.insert("_id", self.doc_id.as_str());
        body.insert("_rev", self.rev_id.to_string());
        if self.deleted {
            body.insert("_deleted", Value::Bool(true));
        }
        Some(body)
    }
}

/// Revisions of a single document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevisionList(Vec<Revision>);

impl RevisionList {
    /// Number of revisions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the revisions in list order.
    pub fn iter(&self) -> std::slice::Iter<'_, Revision> {
        self.0.iter()
    }

    /// Find a revision by id.
    pub fn get(&self, rev_id: &RevisionId) -> Option<&Revision> {
        self.0.iter().find(|rev| &rev.rev_id == rev_id)
    }

    /// Find a revision by sequence.
    pub fn by_sequence(&self, sequence: Sequence) -> Option<&Revision> {
        self.0.iter().find(|rev| rev.sequence == sequence)
    }

    /// The current revisions (leaves).
    pub fn leaves(&self) -> impl Iterator<Item = &Revision> {
        self.0.iter().filter(|rev| rev.current)
    }

    /// Revision ids in list order.
    pub fn rev_ids(&self) -> Vec<RevisionId> {
        self.0.iter().map(|rev| rev.rev_id.clone()).collect()
    }

    /// Sort by revision id, highest first.
    pub fn sort_by_rev_id_desc(&mut self) {
        self.0.sort_by(|a, b| b.rev_id.cmp(&a.rev_id));
    }

    /// Consume into the inner vector.
    pub fn into_vec(self) -> Vec<Revision> {
        self.0
    }
}

impl From<Vec<Revision>> for RevisionList {
    fn from(value: Vec<Revision>) -> Self {
        Self(value)
    }
}

impl IntoIterator for RevisionList {
    type Item = Revision;
    type IntoIter = std::vec::IntoIter<Revision>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a RevisionList {
    type Item = &'a Revision;
    type IntoIter = std::slice::Iter<'a, Revision>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Where a change came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSource {
    /// A local write through [`Database::put_revision`](crate::Database::put_revision).
    Local,
    /// A revision pulled from a replication peer.
    Remote(Option<Url>),
}

impl ChangeSource {
    /// Whether the change was not made locally.
    pub fn is_external(&self) -> bool {
        matches!(self, ChangeSource::Remote(_))
    }
}

/// Emitted once for every successful revision insert.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    /// The inserted revision.
    pub revision: Revision,
    /// The winning revision after the insert, `None` if the insert did not
    /// change the winner.
    pub winning_revision: Option<RevisionId>,
    /// Whether the document has conflicting leaves after the insert.
    pub in_conflict: bool,
    /// Origin of the change.
    pub source: ChangeSource,
}

impl DocumentChange {
    /// Id of the changed document.
    pub fn doc_id(&self) -> &str {
        &self.revision.doc_id
    }

    /// Whether the inserted revision is now the winner.
    pub fn is_current_revision(&self) -> bool {
        self.winning_revision.as_ref() == Some(&self.revision.rev_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_ids() {
        assert!(is_valid_doc_id("foo"));
        assert!(is_valid_doc_id("_design/views"));
        assert!(is_valid_doc_id("a_b"));
        assert!(!is_valid_doc_id(""));
        assert!(!is_valid_doc_id("_local/x"));
        assert!(!is_valid_doc_id("_design"));
        assert!(matches!(validate_doc_id("_foo"), Err(Error::BadRequest(_))));
    }

    #[test]
    fn properties_include_special_keys() {
        let mut body = Body::new();
        body.insert("x", 1);
        let rev = Revision {
            doc_id: "doc".into(),
            rev_id: RevisionId::parse("2-abc").unwrap(),
            deleted: true,
            sequence: 7,
            parent_sequence: Some(3),
            current: true,
            has_attachments: false,
            body: Some(body),
        };
        let props = rev.properties().unwrap().into_value();
        assert_eq!(
            props,
            serde_json::json!({"_id": "doc", "_rev": "2-abc", "_deleted": true, "x": 1})
        );

        let stub = Revision { body: None, ..rev };
        assert!(stub.is_stub());
        assert!(stub.properties().is_none());
    }
}
