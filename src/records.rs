//! Reading and writing document and revision records.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::anyhow;

use crate::{
    attachments::{self, Attachments},
    body::Body,
    database::Database,
    error::{Error, InsertError, Result},
    history::RevisionHistory,
    rev_id::RevisionId,
    revision::{DocNumericId, Revision, RevisionList, Sequence, validate_doc_id},
    store::{Store, StoredRevision},
};

impl<S: Store> Database<S> {
    /// Look up the numeric id of a document.
    pub fn get_doc_numeric_id(&self, doc_id: &str) -> Result<Option<DocNumericId>> {
        Ok(self.store.doc_numeric_id(doc_id)?)
    }

    /// Get the numeric id of a document, creating the document row if needed.
    pub fn insert_doc_numeric_id(&mut self, doc_id: &str) -> Result<DocNumericId> {
        validate_doc_id(doc_id)?;
        self.in_transaction(|db| Ok(db.get_or_insert_doc(doc_id)?.0))
    }

    /// Returns the numeric id and whether the row was created.
    pub(crate) fn get_or_insert_doc(&mut self, doc_id: &str) -> Result<(DocNumericId, bool)> {
        if let Some(doc) = self.store.doc_numeric_id(doc_id)? {
            return Ok((doc, false));
        }
        match self.store.insert_doc(doc_id) {
            Ok(doc) => Ok((doc, true)),
            Err(InsertError::Duplicate) => {
                let doc = self
                    .store
                    .doc_numeric_id(doc_id)?
                    .ok_or_else(|| anyhow!("document {doc_id} vanished after duplicate insert"))?;
                Ok((doc, false))
            }
            Err(InsertError::Store(err)) => Err(err.into()),
        }
    }

    /// All revisions of a document, sequence descending.
    ///
    /// Returns an empty list for unknown documents.
    pub fn get_all_revisions(&self, doc_id: &str, only_current: bool) -> Result<RevisionList> {
        match self.store.doc_numeric_id(doc_id)? {
            Some(doc) => self.revisions_of(doc, doc_id, only_current),
            None => Ok(RevisionList::default()),
        }
    }

    pub(crate) fn revisions_of(
        &self,
        doc: DocNumericId,
        doc_id: &str,
        only_current: bool,
    ) -> Result<RevisionList> {
        let revs = self
            .store
            .revisions(doc, only_current)?
            .into_iter()
            .map(|(sequence, row)| Revision::from_stored(doc_id, sequence, row))
            .collect::<Result<Vec<_>>>()?;
        Ok(revs.into())
    }

    /// The ancestry of `rev`, newest first, starting with `rev` itself.
    ///
    /// Stops at the root or where a parent has been pruned.
    pub fn get_revision_history(&self, rev: &Revision) -> Result<Vec<Revision>> {
        let mut history = vec![rev.clone()];
        let mut next = rev.parent_sequence;
        while let Some(sequence) = next {
            let Some(row) = self.store.revision(sequence)? else {
                break;
            };
            let parent = Revision::from_stored(&rev.doc_id, sequence, row)?;
            next = parent.parent_sequence;
            history.push(parent);
        }
        Ok(history)
    }

    /// The `_revisions` dictionary of `rev`.
    ///
    /// The history is cut after the first revision found in
    /// `known_ancestors`, since a peer that has it also has everything older.
    pub fn get_revision_history_dict(
        &self,
        rev: &Revision,
        known_ancestors: &[RevisionId],
    ) -> Result<RevisionHistory> {
        let mut ids = Vec::new();
        for ancestor in self.get_revision_history(rev)? {
            let known = known_ancestors.contains(&ancestor.rev_id);
            ids.push(ancestor.rev_id);
            if known {
                break;
            }
        }
        Ok(RevisionHistory::new(&ids))
    }

    /// Append a revision row. Returns `None` if the document already has a
    /// revision with this id.
    pub(crate) fn insert_revision(&mut self, row: StoredRevision) -> Result<Option<Sequence>> {
        if row.doc == 0 {
            return Err(Error::bad_request("invalid doc"));
        }
        match self.store.insert_revision(row) {
            Ok(sequence) => Ok(Some(sequence)),
            Err(InsertError::Duplicate) => Ok(None),
            Err(InsertError::Store(err)) => Err(err.into()),
        }
    }

    /// Clear the leaf flag of one row. Returns false if nothing changed.
    pub(crate) fn mark_not_current(&mut self, sequence: Sequence) -> Result<bool> {
        Ok(self.store.mark_not_current(sequence)?)
    }

    /// Get one revision of a document.
    pub fn get_revision(&self, doc_id: &str, rev_id: &RevisionId) -> Result<Revision> {
        let not_found = || Error::not_found(format!("{doc_id} revision {rev_id}"));
        let doc = self.store.doc_numeric_id(doc_id)?.ok_or_else(not_found)?;
        let sequence = self.store.sequence_of(doc, rev_id)?.ok_or_else(not_found)?;
        let row = self.store.revision(sequence)?.ok_or_else(not_found)?;
        Revision::from_stored(doc_id, sequence, row)
    }

    /// The winning revision of a document, which may be a deletion.
    pub fn get_winner(&self, doc_id: &str) -> Result<Option<Revision>> {
        let Some(doc) = self.store.doc_numeric_id(doc_id)? else {
            return Ok(None);
        };
        match self.winning_row(doc)? {
            Some((sequence, row)) => Ok(Some(Revision::from_stored(doc_id, sequence, row)?)),
            None => Ok(None),
        }
    }

    /// The winning revision of a document with its body.
    ///
    /// Fails with [`Error::NotFound`] if the document does not exist or its
    /// winner is a deletion.
    pub fn get_document(&self, doc_id: &str) -> Result<Revision> {
        match self.get_winner(doc_id)? {
            Some(rev) if !rev.deleted => Ok(rev),
            Some(_) => Err(Error::not_found(format!("{doc_id} is deleted"))),
            None => Err(Error::not_found(format!("no document {doc_id}"))),
        }
    }

    /// The non-deleted leaves of a document, highest revision id first.
    ///
    /// A document is in conflict if this returns more than one revision.
    pub fn get_conflicting_revisions(&self, doc_id: &str) -> Result<RevisionList> {
        let leaves: Vec<_> = self
            .get_all_revisions(doc_id, true)?
            .into_iter()
            .filter(|rev| !rev.deleted)
            .collect();
        let mut leaves = RevisionList::from(leaves);
        leaves.sort_by_rev_id_desc();
        Ok(leaves)
    }

    /// Current revisions with a sequence above `since`, ascending.
    ///
    /// At most `limit` revisions are returned, [`Options::changes_limit`] if
    /// `None`.
    ///
    /// [`Options::changes_limit`]: crate::Options::changes_limit
    pub fn changes_since(&self, since: Sequence, limit: Option<usize>) -> Result<Vec<Revision>> {
        let limit = limit.unwrap_or(self.options.changes_limit);
        let mut doc_ids = BTreeMap::new();
        let mut out = Vec::new();
        for (sequence, row) in self.store.changes_since(since, limit)? {
            if !doc_ids.contains_key(&row.doc) {
                doc_ids.insert(row.doc, self.doc_string_id(row.doc)?);
            }
            let doc_id = &doc_ids[&row.doc];
            out.push(Revision::from_stored(doc_id, sequence, row)?);
        }
        Ok(out)
    }

    /// For each document, the given revision ids that are not stored.
    ///
    /// Documents without missing revisions are left out of the result.
    pub fn revs_diff(
        &self,
        revs: BTreeMap<String, Vec<RevisionId>>,
    ) -> Result<BTreeMap<String, Vec<RevisionId>>> {
        let mut missing = BTreeMap::new();
        for (doc_id, rev_ids) in revs {
            let known: BTreeSet<RevisionId> = match self.store.doc_numeric_id(&doc_id)? {
                Some(doc) => self
                    .store
                    .revisions(doc, false)?
                    .into_iter()
                    .map(|(_, row)| row.rev_id)
                    .collect(),
                None => BTreeSet::new(),
            };
            let mut unknown: Vec<_> = rev_ids
                .into_iter()
                .filter(|id| !known.contains(id))
                .collect();
            unknown.sort();
            unknown.dedup();
            if !unknown.is_empty() {
                missing.insert(doc_id, unknown);
            }
        }
        Ok(missing)
    }

    /// The highest sequence assigned so far.
    pub fn last_sequence(&self) -> Result<Sequence> {
        Ok(self.store.last_sequence()?)
    }

    /// Number of document rows, including deleted documents.
    pub fn document_count(&self) -> Result<usize> {
        Ok(self.store.documents()?.len())
    }

    /// Attachments of a revision.
    pub fn attachments(&self, rev: &Revision) -> Result<Attachments> {
        Ok(self.store.attachments(rev.sequence)?.into_iter().collect())
    }

    /// The content of one attachment of a revision.
    pub fn attachment_content(&self, rev: &Revision, name: &str) -> Result<Vec<u8>> {
        let attachments = self.attachments(rev)?;
        let info = attachments
            .get(name)
            .ok_or_else(|| Error::not_found(format!("attachment {name:?} of {}", rev.rev_id)))?;
        self.blobs
            .get(&info.digest)?
            .ok_or_else(|| {
                Error::not_found(format!("content {} of attachment {name:?}", info.digest))
            })
    }

    /// The properties of a revision as returned to callers: the body with
    /// `_id`, `_rev`, `_deleted` and `_attachments` stubs. `None` for stubs.
    pub fn get_properties(&self, rev: &Revision) -> Result<Option<Body>> {
        let Some(mut props) = rev.properties() else {
            return Ok(None);
        };
        if rev.has_attachments {
            let attachments = self.attachments(rev)?;
            if !attachments.is_empty() {
                props.insert("_attachments", attachments::to_property(&attachments));
            }
        }
        Ok(Some(props))
    }

    pub(crate) fn doc_string_id(&self, doc: DocNumericId) -> Result<String> {
        Ok(self
            .store
            .doc_id(doc)?
            .ok_or_else(|| anyhow!("no document row for numeric id {doc}"))?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use testresult::TestResult;

    use super::*;

    fn rev(s: &str) -> RevisionId {
        RevisionId::parse(s).unwrap()
    }

    fn body(value: serde_json::Value) -> Body {
        Body::from_value(value).unwrap()
    }

    #[test]
    fn doc_numeric_ids_are_stable() -> TestResult {
        let mut db = Database::memory();
        assert_eq!(db.get_doc_numeric_id("a")?, None);
        let a = db.insert_doc_numeric_id("a")?;
        assert_eq!(db.insert_doc_numeric_id("a")?, a);
        let b = db.insert_doc_numeric_id("b")?;
        assert_ne!(a, b);
        assert_eq!(db.get_doc_numeric_id("a")?, Some(a));
        assert!(matches!(db.insert_doc_numeric_id("_bad"), Err(Error::BadRequest(_))));
        Ok(())
    }

    #[test]
    fn zero_doc_is_rejected() -> TestResult {
        let mut db = Database::memory();
        let res = db.in_transaction(|db| {
            db.insert_revision(StoredRevision {
                doc: 0,
                rev_id: rev("1-a"),
                parent: None,
                current: true,
                deleted: false,
                has_attachments: false,
                body: None,
            })
        });
        assert!(matches!(res, Err(Error::BadRequest(_))));
        Ok(())
    }

    #[test]
    fn history_follows_parents() -> TestResult {
        let mut db = Database::memory();
        let r1 = db.put_revision(Some("doc"), body(json!({"v": 1})), None, false, false)?;
        let prev = Some(&r1.rev_id);
        let r2 = db.put_revision(Some("doc"), body(json!({"v": 2})), prev, false, false)?;
        let prev = Some(&r2.rev_id);
        let r3 = db.put_revision(Some("doc"), body(json!({"v": 3})), prev, false, false)?;

        let history = db.get_revision_history(&r3)?;
        let ids: Vec<_> = history.iter().map(|r| r.rev_id.clone()).collect();
        assert_eq!(ids, [r3.rev_id.clone(), r2.rev_id.clone(), r1.rev_id.clone()]);

        let dict = db.get_revision_history_dict(&r3, &[])?;
        assert_eq!(dict.start, Some(3));
        assert_eq!(dict.revision_ids()?, ids);

        let dict = db.get_revision_history_dict(&r3, &[r2.rev_id.clone()])?;
        assert_eq!(dict.revision_ids()?, [r3.rev_id.clone(), r2.rev_id.clone()]);
        Ok(())
    }

    #[test]
    fn reads() -> TestResult {
        let mut db = Database::memory();
        let r1 = db.put_revision(Some("doc"), body(json!({"v": 1})), None, false, false)?;
        assert_eq!(db.get_document("doc")?.rev_id, r1.rev_id);
        assert_eq!(db.get_revision("doc", &r1.rev_id)?.body, Some(body(json!({"v": 1}))));
        assert!(matches!(db.get_revision("doc", &rev("9-x")), Err(Error::NotFound(_))));
        assert!(matches!(db.get_document("nope"), Err(Error::NotFound(_))));
        assert_eq!(db.get_all_revisions("nope", false)?.len(), 0);

        let d = db.put_revision(Some("doc"), Body::new(), Some(&r1.rev_id), true, false)?;
        assert!(matches!(db.get_document("doc"), Err(Error::NotFound(_))));
        assert_eq!(db.get_winner("doc")?.map(|r| r.rev_id), Some(d.rev_id));
        assert_eq!(db.document_count()?, 1);
        assert_eq!(db.last_sequence()?, 2);
        Ok(())
    }

    #[test]
    fn changes_since_returns_leaves_in_order() -> TestResult {
        let mut db = Database::memory();
        let a1 = db.put_revision(Some("a"), Body::new(), None, false, false)?;
        db.put_revision(Some("b"), Body::new(), None, false, false)?;
        let a2 = db.put_revision(Some("a"), body(json!({"x": 1})), Some(&a1.rev_id), false, false)?;

        let changes = db.changes_since(0, None)?;
        let seen: Vec<_> = changes.iter().map(|r| (r.doc_id.as_str(), r.sequence)).collect();
        assert_eq!(seen, [("b", 2), ("a", 3)]);
        assert_eq!(changes[1].rev_id, a2.rev_id);
        assert_eq!(db.changes_since(2, None)?.len(), 1);
        assert_eq!(db.changes_since(0, Some(1))?.len(), 1);
        Ok(())
    }

    #[test]
    fn revs_diff_reports_unknown_ids() -> TestResult {
        let mut db = Database::memory();
        let r1 = db.put_revision(Some("a"), Body::new(), None, false, false)?;
        let query = BTreeMap::from([
            ("a".to_string(), vec![r1.rev_id.clone(), rev("2-x"), rev("2-x")]),
            ("b".to_string(), vec![rev("1-y")]),
            ("c".to_string(), vec![]),
        ]);
        let missing = db.revs_diff(query)?;
        assert_eq!(
            missing,
            BTreeMap::from([
                ("a".to_string(), vec![rev("2-x")]),
                ("b".to_string(), vec![rev("1-y")]),
            ])
        );
        Ok(())
    }
}
