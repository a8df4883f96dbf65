//! Inserting revisions: local edits and replicated history.

use anyhow::anyhow;
use serde_json::{Map, Value};
use tracing::{debug, debug_span, trace};
use url::Url;

use crate::{
    attachments::{self, Attachments},
    body::Body,
    database::Database,
    digest::{self, RevisionIdOverflow},
    error::{Error, Result},
    history,
    rev_id::RevisionId,
    revision::{
        ChangeSource, DocNumericId, DocumentChange, Revision, Sequence, validate_doc_id,
    },
    store::{Store, StoredRevision},
    validation::ValidationContext,
};

/// A revision received from a replication peer.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRevision {
    /// Id of the document.
    pub doc_id: String,
    /// Id of the revision, computed by the peer.
    pub rev_id: RevisionId,
    /// Whether the revision is a deletion.
    pub deleted: bool,
    /// Body without special properties.
    pub body: Body,
    /// The declared `_attachments`, if any.
    pub attachments: Option<Map<String, Value>>,
}

impl RemoteRevision {
    /// Split a document as sent by a peer, with `_id`, `_rev` and optionally
    /// `_revisions`, into the revision and its newest-first history.
    ///
    /// Without `_revisions` the history is just the revision itself.
    pub fn from_properties(props: Body) -> Result<(Self, Vec<RevisionId>)> {
        let (body, special) = props.split_special()?;
        let doc_id = special.id.ok_or_else(|| Error::bad_request("missing _id"))?;
        let rev_id = special.rev.ok_or_else(|| Error::bad_request("missing _rev"))?;
        let history = match special.revisions {
            Some(revisions) => history::parse(revisions)?,
            None => vec![rev_id.clone()],
        };
        let rev = Self {
            doc_id,
            rev_id,
            deleted: special.deleted,
            body,
            attachments: special.attachments,
        };
        Ok((rev, history))
    }
}

impl<S: Store> Database<S> {
    /// Create a new revision from a local edit.
    ///
    /// `body` may carry `_id`, `_rev`, `_deleted` and `_attachments`; `_id` and
    /// `_rev` must agree with `doc_id` and `prev_rev_id` when both are given.
    /// Without a document id a random one is generated. Without `prev_rev_id`
    /// the document must not exist, or its winner must be a deletion, which
    /// then becomes the parent.
    ///
    /// Unless `allow_conflict` is set, the parent must be the current winner,
    /// so local edits never create branches.
    pub fn put_revision(
        &mut self,
        doc_id: Option<&str>,
        body: Body,
        prev_rev_id: Option<&RevisionId>,
        deleted: bool,
        allow_conflict: bool,
    ) -> Result<Revision> {
        let (body, special) = body.split_special()?;
        let doc_id = match (doc_id, special.id) {
            (Some(doc_id), Some(body_id)) if doc_id != body_id => {
                return Err(Error::bad_request(format!(
                    "document id {doc_id:?} does not match _id {body_id:?}"
                )));
            }
            (Some(doc_id), _) => Some(doc_id.to_string()),
            (None, body_id) => body_id,
        };
        let prev_rev_id = match (prev_rev_id, special.rev) {
            (Some(prev), Some(body_rev)) if *prev != body_rev => {
                return Err(Error::bad_request(format!(
                    "revision {prev} does not match _rev {body_rev}"
                )));
            }
            (Some(prev), _) => Some(prev.clone()),
            (None, body_rev) => body_rev,
        };
        let deleted = deleted || special.deleted;
        if let Some(doc_id) = &doc_id {
            validate_doc_id(doc_id)?;
        }

        let _guard = debug_span!(
            "put_revision",
            doc_id = doc_id.as_deref().unwrap_or_default(),
            prev = ?prev_rev_id,
            deleted
        )
        .entered();
        let declared = special.attachments.unwrap_or_default();
        let res = self.in_transaction(|db| {
            db.put_revision_inner(doc_id, body, declared, prev_rev_id, deleted, allow_conflict)
        });
        match &res {
            Ok(rev) => debug!(rev = %rev.rev_id, sequence = rev.sequence, "put revision"),
            Err(Error::Conflict(reason)) => {
                self.metrics.conflicts.inc();
                debug!(%reason, "conflict");
            }
            Err(_) => {}
        }
        res
    }

    fn put_revision_inner(
        &mut self,
        doc_id: Option<String>,
        body: Body,
        declared: Map<String, Value>,
        prev_rev_id: Option<RevisionId>,
        deleted: bool,
        allow_conflict: bool,
    ) -> Result<Revision> {
        let doc_id = match doc_id {
            Some(doc_id) => doc_id,
            None if prev_rev_id.is_some() => {
                return Err(Error::not_found("can not update a document without an id"));
            }
            None if deleted => {
                return Err(Error::not_found("can not delete a document without an id"));
            }
            None => self.generate_doc_id()?,
        };
        let (doc, _) = self.get_or_insert_doc(&doc_id)?;
        let old_winner = self.winning_row(doc)?;
        let old_winner_id = old_winner.as_ref().map(|(_, row)| row.rev_id.clone());
        let old_was_deletion = old_winner.as_ref().is_some_and(|(_, row)| row.deleted);
        let exists = old_winner.as_ref().is_some_and(|(_, row)| !row.deleted);

        let parent = match &prev_rev_id {
            Some(prev) => {
                let found = match self.store.sequence_of(doc, prev)? {
                    Some(sequence) => self
                        .store
                        .revision(sequence)?
                        .filter(|row| allow_conflict || row.current)
                        .map(|row| (sequence, row)),
                    None => None,
                };
                match found {
                    Some(parent) => Some(parent),
                    None if !allow_conflict && exists => {
                        return Err(Error::conflict(format!(
                            "{prev} is not a current revision of {doc_id}"
                        )));
                    }
                    None => {
                        return Err(Error::not_found(format!("{doc_id} revision {prev}")));
                    }
                }
            }
            None if deleted => {
                return Err(if exists {
                    Error::conflict(format!("deleting {doc_id} requires a revision"))
                } else {
                    Error::not_found(format!("no document {doc_id}"))
                });
            }
            None => match old_winner {
                // recreating a deleted document continues its tree
                Some((sequence, row)) if row.deleted => Some((sequence, row)),
                Some(_) => {
                    return Err(Error::conflict(format!("{doc_id} already exists")));
                }
                None => None,
            },
        };
        if let Some((_, row)) = &parent {
            if !allow_conflict && Some(&row.rev_id) != old_winner_id.as_ref() {
                return Err(Error::conflict(format!(
                    "{} is not the winning revision of {doc_id}",
                    row.rev_id
                )));
            }
        }
        let parent = parent
            .map(|(sequence, row)| Revision::from_stored(&doc_id, sequence, row))
            .transpose()?;

        let generation = parent
            .as_ref()
            .map(Revision::generation)
            .unwrap_or_default()
            .checked_add(1)
            .ok_or(RevisionIdOverflow::Generation)?;
        let inherited = match &parent {
            Some(parent) => self.attachments(parent)?,
            None => Attachments::new(),
        };
        let attachments = attachments::resolve(declared, generation, &inherited, self.blobs())?;
        let body_bytes = body.to_canonical_bytes()?;
        let rev_id = digest::next_revision_id(
            parent.as_ref().map(|parent| &parent.rev_id),
            deleted,
            attachments::digests(&attachments),
            Some(body_bytes.as_slice()),
        )?;

        let ctx = ValidationContext {
            doc_id: &doc_id,
            rev_id: &rev_id,
            deleted,
            body: &body,
            parent: parent.as_ref(),
        };
        if let Err((name, reason)) = self.validations.validate(&ctx) {
            self.metrics.validation_rejected.inc();
            debug!(validation = %name, %reason, "revision rejected");
            return Err(Error::Forbidden(reason));
        }

        let parent_sequence = parent.as_ref().map(|parent| parent.sequence);
        let row = StoredRevision {
            doc,
            rev_id: rev_id.clone(),
            parent: parent_sequence,
            current: true,
            deleted,
            has_attachments: !attachments.is_empty(),
            body: Some(body_bytes),
        };
        let Some(sequence) = self.insert_revision(row)? else {
            // the same edit was made before, which yields the same id
            debug!(rev = %rev_id, "revision already exists");
            return self.get_revision(&doc_id, &rev_id);
        };
        for (name, info) in &attachments {
            self.store.put_attachment(sequence, name, info)?;
        }
        if let Some(parent_sequence) = parent_sequence {
            if !self.mark_not_current(parent_sequence)? && !allow_conflict {
                return Err(Error::conflict(format!(
                    "parent of {rev_id} is no longer current"
                )));
            }
        }

        let winning_revision =
            self.winner(doc, old_winner_id.as_ref(), old_was_deletion, &rev_id, deleted)?;
        let in_conflict = self.doc_in_conflict(doc)?;
        let revision = Revision {
            doc_id,
            rev_id,
            deleted,
            sequence,
            parent_sequence,
            current: true,
            has_attachments: !attachments.is_empty(),
            body: Some(body),
        };
        self.queue_change(DocumentChange {
            revision: revision.clone(),
            winning_revision,
            in_conflict,
            source: ChangeSource::Local,
        });
        self.metrics.put_revisions.inc();
        self.prune_after_insert(doc)?;
        Ok(revision)
    }

    /// Insert a revision together with its ancestry, as received from a peer.
    ///
    /// `history` lists revision ids newest first and must start with
    /// `rev.rev_id`. Ancestors that are not stored yet are inserted as stubs.
    /// Inserting a revision that is already stored does nothing. Validation
    /// callbacks are not run.
    pub fn force_insert(
        &mut self,
        rev: RemoteRevision,
        history: &[RevisionId],
        source: Option<Url>,
    ) -> Result<()> {
        validate_doc_id(&rev.doc_id)?;
        if history.first() != Some(&rev.rev_id) {
            return Err(Error::bad_request(format!(
                "history of {} does not start with it",
                rev.rev_id
            )));
        }
        if let Some(pair) = history
            .windows(2)
            .find(|pair| pair[1].generation().checked_add(1) != Some(pair[0].generation()))
        {
            return Err(Error::bad_request(format!(
                "history is not contiguous between {} and {}",
                pair[0], pair[1]
            )));
        }
        let _guard = debug_span!(
            "force_insert",
            doc_id = %rev.doc_id,
            rev = %rev.rev_id,
            source = ?source.as_ref().map(Url::as_str)
        )
        .entered();
        self.in_transaction(|db| db.force_insert_inner(rev, history, source))
    }

    fn force_insert_inner(
        &mut self,
        mut rev: RemoteRevision,
        history: &[RevisionId],
        source: Option<Url>,
    ) -> Result<()> {
        let (doc, _) = self.get_or_insert_doc(&rev.doc_id)?;
        if self.store.sequence_of(doc, &rev.rev_id)?.is_some() {
            debug!("revision already known");
            return Ok(());
        }
        let old_winner = self.winning_row(doc)?;
        let old_winner_id = old_winner.as_ref().map(|(_, row)| row.rev_id.clone());
        let old_was_deletion = old_winner.as_ref().is_some_and(|(_, row)| row.deleted);

        let mut ancestor = None;
        let mut new_count = history.len();
        for (i, id) in history.iter().enumerate().skip(1) {
            if let Some(sequence) = self.store.sequence_of(doc, id)? {
                ancestor = Some(sequence);
                new_count = i;
                break;
            }
        }
        if ancestor.is_none() {
            let max_depth = usize::try_from(self.options.max_rev_tree_depth)
                .unwrap_or(usize::MAX)
                .max(1);
            new_count = new_count.min(max_depth);
        }
        let new_ids = &history[..new_count];
        trace!(new = new_count, ancestor = ?ancestor, "inserting history");

        let inherited: Attachments = match ancestor {
            Some(sequence) => self.store.attachments(sequence)?.into_iter().collect(),
            None => Attachments::new(),
        };
        let attachments = attachments::resolve(
            rev.attachments.take().unwrap_or_default(),
            rev.rev_id.generation(),
            &inherited,
            self.blobs(),
        )?;
        let body_bytes = rev.body.to_canonical_bytes()?;

        let mut parent = ancestor;
        for id in new_ids[1..].iter().rev() {
            let stub = StoredRevision {
                doc,
                rev_id: id.clone(),
                parent,
                current: false,
                deleted: false,
                has_attachments: false,
                body: None,
            };
            let sequence = match self.insert_revision(stub)? {
                Some(sequence) => {
                    self.metrics.stubs_inserted.inc();
                    sequence
                }
                None => self.existing_sequence(doc, id)?,
            };
            parent = Some(sequence);
        }
        let row = StoredRevision {
            doc,
            rev_id: rev.rev_id.clone(),
            parent,
            current: true,
            deleted: rev.deleted,
            has_attachments: !attachments.is_empty(),
            body: Some(body_bytes),
        };
        let sequence = match self.insert_revision(row)? {
            Some(sequence) => sequence,
            None => self.existing_sequence(doc, &rev.rev_id)?,
        };
        for (name, info) in &attachments {
            self.store.put_attachment(sequence, name, info)?;
        }
        if let Some(ancestor) = ancestor {
            if !self.mark_not_current(ancestor)? {
                debug!("created a new branch");
            }
        }

        let winning_revision = self.winner(
            doc,
            old_winner_id.as_ref(),
            old_was_deletion,
            &rev.rev_id,
            rev.deleted,
        )?;
        let in_conflict = self.doc_in_conflict(doc)?;
        let revision = Revision {
            doc_id: rev.doc_id,
            rev_id: rev.rev_id,
            deleted: rev.deleted,
            sequence,
            parent_sequence: parent,
            current: true,
            has_attachments: !attachments.is_empty(),
            body: Some(rev.body),
        };
        debug!(sequence, new = new_count, "force inserted revision");
        self.queue_change(DocumentChange {
            revision,
            winning_revision,
            in_conflict,
            source: ChangeSource::Remote(source),
        });
        self.metrics.force_inserted.inc_by(new_count as u64);
        self.prune_after_insert(doc)?;
        Ok(())
    }

    fn existing_sequence(&self, doc: DocNumericId, rev_id: &RevisionId) -> Result<Sequence> {
        Ok(self
            .store
            .sequence_of(doc, rev_id)?
            .ok_or_else(|| anyhow!("duplicate revision {rev_id} not found"))?)
    }

    fn generate_doc_id(&self) -> Result<String> {
        loop {
            let doc_id = data_encoding::HEXLOWER.encode(&rand::random::<[u8; 16]>());
            if self.store.doc_numeric_id(&doc_id)?.is_none() {
                return Ok(doc_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use data_encoding::BASE64;
    use serde_json::json;
    use testresult::TestResult;
    use tracing_test::traced_test;

    use super::*;
    use crate::{blobs::BlobKey, store::memory};

    fn rev(s: &str) -> RevisionId {
        RevisionId::parse(s).unwrap()
    }

    fn body(value: serde_json::Value) -> Body {
        Body::from_value(value).unwrap()
    }

    fn put(
        db: &mut Database<memory::Store>,
        doc_id: &str,
        value: serde_json::Value,
        prev: Option<&Revision>,
    ) -> Result<Revision> {
        db.put_revision(Some(doc_id), body(value), prev.map(|r| &r.rev_id), false, false)
    }

    #[test]
    #[traced_test]
    fn create_update_delete() -> TestResult {
        let mut db = Database::memory();
        let r1 = put(&mut db, "doc", json!({"v": 1}), None)?;
        assert_eq!(r1.generation(), 1);
        assert_eq!(r1.sequence, 1);
        assert!(r1.current);

        let r2 = put(&mut db, "doc", json!({"v": 2}), Some(&r1))?;
        assert_eq!(r2.generation(), 2);
        assert_eq!(r2.parent_sequence, Some(r1.sequence));
        assert!(!db.get_revision("doc", &r1.rev_id)?.current);

        let d = db.put_revision(Some("doc"), Body::new(), Some(&r2.rev_id), true, false)?;
        assert!(d.deleted);
        assert_eq!(d.generation(), 3);
        assert!(matches!(db.get_document("doc"), Err(Error::NotFound(_))));
        assert_eq!(db.metrics().put_revisions.get(), 3);
        Ok(())
    }

    #[test]
    fn same_edit_yields_same_id() -> TestResult {
        let mut a = Database::memory();
        let mut b = Database::memory();
        let a1 = put(&mut a, "doc", json!({"x": [1, 2], "a": "b"}), None)?;
        let b1 = b.put_revision(
            Some("doc"),
            Body::from_slice(br#"{"a":"b","x":[1,2]}"#)?,
            None,
            false,
            false,
        )?;
        assert_eq!(a1.rev_id, b1.rev_id);
        Ok(())
    }

    #[test]
    fn stale_parent_conflicts() -> TestResult {
        let mut db = Database::memory();
        let r1 = put(&mut db, "doc", json!({"v": 1}), None)?;
        put(&mut db, "doc", json!({"v": 2}), Some(&r1))?;
        let res = put(&mut db, "doc", json!({"v": 3}), Some(&r1));
        assert!(matches!(res, Err(Error::Conflict(_))));
        assert_eq!(db.metrics().conflicts.get(), 1);

        // an existing document needs a parent
        let res = put(&mut db, "doc", json!({"v": 4}), None);
        assert!(matches!(res, Err(Error::Conflict(_))));
        // unknown parent of an unknown document
        let res = db.put_revision(Some("other"), Body::new(), Some(&rev("1-x")), false, false);
        assert!(matches!(res, Err(Error::NotFound(_))));
        // nothing was left behind by the failed writes
        assert_eq!(db.get_doc_numeric_id("other")?, None);
        Ok(())
    }

    #[test]
    fn allow_conflict_creates_branch() -> TestResult {
        let mut db = Database::memory();
        let r1 = put(&mut db, "doc", json!({"v": 1}), None)?;
        let r2 = put(&mut db, "doc", json!({"v": 2}), Some(&r1))?;
        let branch =
            db.put_revision(Some("doc"), body(json!({"v": 3})), Some(&r1.rev_id), false, true)?;
        assert_eq!(branch.generation(), 2);
        let leaves = db.get_all_revisions("doc", true)?.rev_ids();
        assert_eq!(leaves.len(), 2);
        assert!(leaves.contains(&r2.rev_id));
        assert!(leaves.contains(&branch.rev_id));
        assert!(db.in_conflict("doc")?);
        Ok(())
    }

    #[test]
    fn deleting_requires_existing_document() -> TestResult {
        let mut db = Database::memory();
        let res = db.put_revision(Some("doc"), Body::new(), None, true, false);
        assert!(matches!(res, Err(Error::NotFound(_))));
        put(&mut db, "doc", json!({}), None)?;
        let res = db.put_revision(Some("doc"), Body::new(), None, true, false);
        assert!(matches!(res, Err(Error::Conflict(_))));
        let res = db.put_revision(None, Body::new(), None, true, false);
        assert!(matches!(res, Err(Error::NotFound(_))));
        Ok(())
    }

    #[test]
    fn recreating_deleted_document_continues_tree() -> TestResult {
        let mut db = Database::memory();
        let r1 = put(&mut db, "doc", json!({"v": 1}), None)?;
        let d = db.put_revision(Some("doc"), Body::new(), Some(&r1.rev_id), true, false)?;
        let r3 = put(&mut db, "doc", json!({"v": 3}), None)?;
        assert_eq!(r3.generation(), 3);
        assert_eq!(r3.parent_sequence, Some(d.sequence));
        assert_eq!(db.get_all_revisions("doc", true)?.len(), 1);
        Ok(())
    }

    #[test]
    fn special_properties_in_body() -> TestResult {
        let mut db = Database::memory();
        let r1 = db.put_revision(None, body(json!({"_id": "doc", "v": 1})), None, false, false)?;
        assert_eq!(r1.doc_id, "doc");
        assert_eq!(r1.body, Some(body(json!({"v": 1}))));

        let props = body(json!({"_id": "doc", "_rev": r1.rev_id.to_string(), "_deleted": true}));
        let d = db.put_revision(Some("doc"), props, None, false, false)?;
        assert!(d.deleted);

        let res = db.put_revision(Some("a"), body(json!({"_id": "b"})), None, false, false);
        assert!(matches!(res, Err(Error::BadRequest(_))));
        let res = db.put_revision(Some("a"), body(json!({"_foo": 1})), None, false, false);
        assert!(matches!(res, Err(Error::BadRequest(_))));
        let res = db.put_revision(Some("_local/a"), Body::new(), None, false, false);
        assert!(matches!(res, Err(Error::BadRequest(_))));
        Ok(())
    }

    #[test]
    fn post_generates_ids() -> TestResult {
        let mut db = Database::memory();
        let a = db.put_revision(None, body(json!({"n": 1})), None, false, false)?;
        let b = db.put_revision(None, body(json!({"n": 1})), None, false, false)?;
        assert_ne!(a.doc_id, b.doc_id);
        assert_eq!(a.doc_id.len(), 32);
        assert!(a.doc_id.chars().all(|c| c.is_ascii_hexdigit()));
        let res = db.put_revision(None, Body::new(), Some(&a.rev_id), false, false);
        assert!(matches!(res, Err(Error::NotFound(_))));
        Ok(())
    }

    #[test]
    fn validation_rejects() -> TestResult {
        let mut db = Database::memory();
        db.set_validation("needs-type", |ctx| {
            if ctx.deleted || ctx.body.get("type").is_some() {
                Ok(())
            } else {
                Err(format!("{} has no type", ctx.doc_id))
            }
        });
        let res = db.put_revision(Some("doc"), Body::new(), None, false, false);
        match res {
            Err(Error::Forbidden(reason)) => assert_eq!(reason, "doc has no type"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(db.metrics().validation_rejected.get(), 1);
        assert_eq!(db.last_sequence()?, 0);
        put(&mut db, "doc", json!({"type": "x"}), None)?;
        Ok(())
    }

    #[test]
    fn attachments_are_stored_and_inherited() -> TestResult {
        let mut db = Database::memory();
        let data = b"hello world";
        let r1 = put(
            &mut db,
            "doc",
            json!({"_attachments": {
                "a.txt": {"data": BASE64.encode(data), "content_type": "text/plain"},
            }}),
            None,
        )?;
        assert!(r1.has_attachments);
        assert_eq!(db.attachment_content(&r1, "a.txt")?, data);

        let r2 = put(
            &mut db,
            "doc",
            json!({"v": 2, "_attachments": {"a.txt": {"stub": true}}}),
            Some(&r1),
        )?;
        let atts = db.attachments(&r2)?;
        assert_eq!(atts["a.txt"].digest, BlobKey::new(data));
        assert_eq!(atts["a.txt"].revpos, 1);
        assert_eq!(atts["a.txt"].length, data.len() as u64);

        let props = db.get_properties(&r2)?.unwrap();
        assert_eq!(props.get("_attachments").unwrap()["a.txt"]["stub"], json!(true));

        // a stub without stored content
        let res = put(
            &mut db,
            "doc",
            json!({"_attachments": {"b.txt": {"stub": true}}}),
            Some(&r2),
        );
        assert!(matches!(res, Err(Error::BadRequest(_))));
        Ok(())
    }

    #[test]
    #[traced_test]
    fn force_insert_creates_stubs() -> TestResult {
        let mut db = Database::memory();
        let rx = db.subscribe();
        let source: Url = "http://peer.example/db".parse()?;
        let history = [rev("3-ccc"), rev("2-bbb"), rev("1-aaa")];
        let remote = RemoteRevision {
            doc_id: "doc".into(),
            rev_id: rev("3-ccc"),
            deleted: false,
            body: body(json!({"v": 3})),
            attachments: None,
        };
        db.force_insert(remote.clone(), &history, Some(source.clone()))?;

        let revs = db.get_all_revisions("doc", false)?;
        assert_eq!(revs.len(), 3);
        assert!(revs.get(&rev("1-aaa")).unwrap().is_stub());
        assert!(revs.get(&rev("2-bbb")).unwrap().is_stub());
        assert!(!revs.get(&rev("2-bbb")).unwrap().current);
        let leaf = revs.get(&rev("3-ccc")).unwrap();
        assert!(leaf.current);
        assert_eq!(leaf.body, Some(body(json!({"v": 3}))));
        assert_eq!(db.metrics().stubs_inserted.get(), 2);

        let change = rx.try_recv()?;
        assert_eq!(change.source, ChangeSource::Remote(Some(source)));
        assert!(change.is_current_revision());

        // idempotent
        db.force_insert(remote, &history, None)?;
        assert_eq!(db.last_sequence()?, 3);
        assert!(rx.try_recv().is_err());
        Ok(())
    }

    #[test]
    fn force_insert_extends_known_ancestor() -> TestResult {
        let mut db = Database::memory();
        let r1 = put(&mut db, "doc", json!({"v": 1}), None)?;
        let r2 = rev("2-bbb");
        let r3 = rev("3-ccc");
        let remote = RemoteRevision {
            doc_id: "doc".into(),
            rev_id: r3.clone(),
            deleted: false,
            body: body(json!({"v": 3})),
            attachments: None,
        };
        db.force_insert(remote, &[r3.clone(), r2.clone(), r1.rev_id.clone()], None)?;
        let leaves = db.get_all_revisions("doc", true)?.rev_ids();
        assert_eq!(leaves, [r3.clone()]);
        let leaf = db.get_revision("doc", &r3)?;
        let history: Vec<_> = db
            .get_revision_history(&leaf)?
            .into_iter()
            .map(|r| r.rev_id)
            .collect();
        assert_eq!(history, [r3, r2, r1.rev_id]);
        Ok(())
    }

    #[test]
    fn force_insert_rejects_bad_history() {
        let mut db = Database::memory();
        let remote = RemoteRevision {
            doc_id: "doc".into(),
            rev_id: rev("3-ccc"),
            deleted: false,
            body: Body::new(),
            attachments: None,
        };
        for history in [
            vec![],
            vec![rev("2-bbb")],
            vec![rev("3-ccc"), rev("1-aaa")],
        ] {
            let res = db.force_insert(remote.clone(), &history, None);
            assert!(matches!(res, Err(Error::BadRequest(_))), "{history:?}");
        }
    }

    #[test]
    fn failed_force_insert_leaves_no_stubs() -> TestResult {
        let mut db = Database::memory();
        let remote = RemoteRevision {
            doc_id: "doc".into(),
            rev_id: rev("3-ccc"),
            deleted: false,
            body: Body::new(),
            attachments: Some(
                json!({"x": {"digest": BlobKey::new(b"missing").to_string()}})
                    .as_object()
                    .cloned()
                    .unwrap(),
            ),
        };
        let res = db.force_insert(remote, &[rev("3-ccc"), rev("2-bbb"), rev("1-aaa")], None);
        assert!(matches!(res, Err(Error::BadRequest(_))));
        assert_eq!(db.get_all_revisions("doc", false)?.len(), 0);
        assert_eq!(db.last_sequence()?, 0);
        Ok(())
    }

    #[test]
    fn remote_revision_from_properties() -> TestResult {
        let props = body(json!({
            "_id": "doc",
            "_rev": "3-ccc",
            "_revisions": {"start": 3, "ids": ["ccc", "bbb", "aaa"]},
            "v": 1,
        }));
        let (remote, history) = RemoteRevision::from_properties(props)?;
        assert_eq!(remote.doc_id, "doc");
        assert_eq!(remote.body, body(json!({"v": 1})));
        assert_eq!(history, [rev("3-ccc"), rev("2-bbb"), rev("1-aaa")]);

        let props = body(json!({"_id": "d", "_rev": "1-a"}));
        let (_, history) = RemoteRevision::from_properties(props)?;
        assert_eq!(history, [rev("1-a")]);
        assert!(RemoteRevision::from_properties(body(json!({"_rev": "1-a"}))).is_err());
        Ok(())
    }
}
