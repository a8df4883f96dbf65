//! Storage trait and implementations for revision trees.
//!
//! A [`Store`] is a flat transactional record store: documents, revision rows,
//! attachment rows and a sequence counter. Nesting of transactions and all
//! tree semantics live in [`Database`](crate::Database).

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{
    attachments::AttachmentInfo,
    error::InsertError,
    rev_id::RevisionId,
    revision::{DocNumericId, Sequence},
};

pub mod fs;
pub mod memory;

/// A revision row as persisted by a [`Store`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRevision {
    /// Numeric id of the owning document.
    pub doc: DocNumericId,
    /// Id of the revision.
    pub rev_id: RevisionId,
    /// Sequence of the parent row.
    pub parent: Option<Sequence>,
    /// Whether the row is a leaf.
    pub current: bool,
    /// Whether the revision is a deletion.
    pub deleted: bool,
    /// Whether the body declared attachments.
    pub has_attachments: bool,
    /// Canonical JSON body, `None` for stubs.
    pub body: Option<Vec<u8>>,
}

/// Backing record store.
///
/// Write methods must only be called between [`Store::begin`] and
/// [`Store::commit`] or [`Store::rollback`]. Reads may be called at any time
/// and observe the writes of the open transaction.
pub trait Store: std::fmt::Debug + 'static {
    /// Open a write transaction.
    fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction.
    fn commit(&mut self) -> Result<()>;

    /// Discard every write of the open transaction.
    fn rollback(&mut self) -> Result<()>;

    /// Look up the numeric id of a document.
    fn doc_numeric_id(&self, doc_id: &str) -> Result<Option<DocNumericId>>;

    /// Insert a document row, returning its new numeric id.
    ///
    /// Fails with [`InsertError::Duplicate`] if the document exists.
    fn insert_doc(&mut self, doc_id: &str) -> Result<DocNumericId, InsertError>;

    /// Look up the string id of a document.
    fn doc_id(&self, doc: DocNumericId) -> Result<Option<String>>;

    /// Numeric ids of all documents, ascending.
    fn documents(&self) -> Result<Vec<DocNumericId>>;

    /// Delete a document row and all of its revisions, returning the number of
    /// revisions removed.
    fn delete_document(&mut self, doc: DocNumericId) -> Result<usize>;

    /// Get a revision row by sequence.
    fn revision(&self, sequence: Sequence) -> Result<Option<StoredRevision>>;

    /// Get the sequence of a revision of a document.
    fn sequence_of(&self, doc: DocNumericId, rev_id: &RevisionId) -> Result<Option<Sequence>>;

    /// Revision rows of a document, sequence descending.
    fn revisions(
        &self,
        doc: DocNumericId,
        only_current: bool,
    ) -> Result<Vec<(Sequence, StoredRevision)>>;

    /// Append a revision row, assigning the next sequence.
    ///
    /// Fails with [`InsertError::Duplicate`] if the document already has a row
    /// with the same revision id.
    fn insert_revision(&mut self, rev: StoredRevision) -> Result<Sequence, InsertError>;

    /// Clear `current` on one row. Returns false if the row does not exist or
    /// was not current.
    fn mark_not_current(&mut self, sequence: Sequence) -> Result<bool>;

    /// Delete revision rows together with their attachment rows, returning the
    /// number of rows removed.
    fn delete_revisions(&mut self, sequences: &[Sequence]) -> Result<usize>;

    /// Record an attachment of a revision.
    fn put_attachment(
        &mut self,
        sequence: Sequence,
        name: &str,
        info: &AttachmentInfo,
    ) -> Result<()>;

    /// Attachments of a revision, by name.
    fn attachments(&self, sequence: Sequence) -> Result<Vec<(String, AttachmentInfo)>>;

    /// Highest sequence assigned so far, 0 for an empty store.
    fn last_sequence(&self) -> Result<Sequence>;

    /// Current rows with a sequence above `since`, ascending, at most `limit`.
    fn changes_since(
        &self,
        since: Sequence,
        limit: usize,
    ) -> Result<Vec<(Sequence, StoredRevision)>>;
}
