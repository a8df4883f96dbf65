//! Winner selection and conflict detection.
//!
//! Among the leaves of a document, a live revision beats a deletion, and
//! otherwise the higher revision id wins. Every replica applies the same rule,
//! so all of them agree on the winner without coordination.

use std::cmp::Ordering;

use crate::{
    database::Database,
    error::Result,
    rev_id::RevisionId,
    revision::{DocNumericId, Revision, Sequence},
    store::{Store, StoredRevision},
};

fn compare(a_deleted: bool, a: &RevisionId, b_deleted: bool, b: &RevisionId) -> Ordering {
    b_deleted.cmp(&a_deleted).then_with(|| a.cmp(b))
}

/// Pick the winner among `leaves`.
pub fn pick_winner<'a>(leaves: impl IntoIterator<Item = &'a Revision>) -> Option<&'a Revision> {
    leaves
        .into_iter()
        .max_by(|a, b| compare(a.deleted, &a.rev_id, b.deleted, &b.rev_id))
}

impl<S: Store> Database<S> {
    pub(crate) fn winning_row(
        &self,
        doc: DocNumericId,
    ) -> Result<Option<(Sequence, StoredRevision)>> {
        Ok(self
            .store
            .revisions(doc, true)?
            .into_iter()
            .max_by(|(_, a), (_, b)| compare(a.deleted, &a.rev_id, b.deleted, &b.rev_id)))
    }

    /// Determine the winner after `new` was inserted, given the winner before.
    ///
    /// Returns `None` if the winner did not change. Must be called after the
    /// parent of `new` was demoted.
    pub(crate) fn winner(
        &self,
        doc: DocNumericId,
        old_winner: Option<&RevisionId>,
        old_was_deletion: bool,
        new_rev_id: &RevisionId,
        new_deleted: bool,
    ) -> Result<Option<RevisionId>> {
        let Some(old_winner) = old_winner else {
            return Ok(Some(new_rev_id.clone()));
        };
        if !new_deleted {
            if old_was_deletion || new_rev_id > old_winner {
                return Ok(Some(new_rev_id.clone()));
            }
            return Ok(None);
        }
        if old_was_deletion {
            if new_rev_id > old_winner {
                return Ok(Some(new_rev_id.clone()));
            }
            return Ok(None);
        }
        // a live winner may have been replaced by the deletion, the next
        // best leaf decides
        match self.winning_row(doc)? {
            Some((_, row)) if &row.rev_id != old_winner => Ok(Some(row.rev_id)),
            _ => Ok(None),
        }
    }

    /// Whether a document has more than one non-deleted leaf.
    pub fn in_conflict(&self, doc_id: &str) -> Result<bool> {
        match self.store.doc_numeric_id(doc_id)? {
            Some(doc) => self.doc_in_conflict(doc),
            None => Ok(false),
        }
    }

    pub(crate) fn doc_in_conflict(&self, doc: DocNumericId) -> Result<bool> {
        let live = self
            .store
            .revisions(doc, true)?
            .iter()
            .filter(|(_, row)| !row.deleted)
            .count();
        Ok(live > 1)
    }
}
