//! In memory storage for revision trees.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, bail};

use super::StoredRevision;
use crate::{
    attachments::AttachmentInfo,
    error::InsertError,
    rev_id::RevisionId,
    revision::{DocNumericId, Sequence},
};

/// In memory [`super::Store`].
///
/// Writes of an open transaction append their inverse to a journal, which
/// [`rollback`] replays newest first and [`commit`] drops.
///
/// [`rollback`]: super::Store::rollback
/// [`commit`]: super::Store::commit
#[derive(Debug, Default)]
pub struct Store {
    tables: Tables,
    journal: Option<Journal>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Tables {
    docs: BTreeMap<String, DocNumericId>,
    doc_ids: BTreeMap<DocNumericId, String>,
    revisions: BTreeMap<Sequence, StoredRevision>,
    /// (doc, rev id) -> sequence
    revs_by_doc: BTreeMap<(DocNumericId, RevisionId), Sequence>,
    /// (doc, sequence)
    doc_sequences: BTreeSet<(DocNumericId, Sequence)>,
    attachments: BTreeMap<(Sequence, String), AttachmentInfo>,
    last_sequence: Sequence,
    last_doc: DocNumericId,
}

/// Undo log of the open transaction.
#[derive(Debug)]
struct Journal {
    last_sequence: Sequence,
    last_doc: DocNumericId,
    undo: Vec<Undo>,
}

#[derive(Debug)]
enum Undo {
    InsertDoc(DocNumericId),
    DeleteDoc(DocNumericId, String),
    InsertRevision(Sequence),
    DeleteRevision {
        sequence: Sequence,
        rev: StoredRevision,
        attachments: Vec<(String, AttachmentInfo)>,
    },
    MarkNotCurrent(Sequence),
    PutAttachment {
        sequence: Sequence,
        name: String,
        previous: Option<AttachmentInfo>,
    },
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn writable(&mut self) -> Result<(&mut Tables, &mut Vec<Undo>)> {
        match &mut self.journal {
            Some(journal) => Ok((&mut self.tables, &mut journal.undo)),
            None => bail!("write outside of a transaction"),
        }
    }
}

impl Tables {
    fn insert_doc(&mut self, doc: DocNumericId, doc_id: String) {
        self.docs.insert(doc_id.clone(), doc);
        self.doc_ids.insert(doc, doc_id);
    }

    fn remove_doc(&mut self, doc: DocNumericId) -> Option<String> {
        let doc_id = self.doc_ids.remove(&doc)?;
        self.docs.remove(&doc_id);
        Some(doc_id)
    }

    fn insert_row(&mut self, sequence: Sequence, rev: StoredRevision) {
        self.revs_by_doc.insert((rev.doc, rev.rev_id.clone()), sequence);
        self.doc_sequences.insert((rev.doc, sequence));
        self.revisions.insert(sequence, rev);
    }

    fn remove_revision(&mut self, sequence: Sequence) -> Option<Undo> {
        let rev = self.revisions.remove(&sequence)?;
        self.revs_by_doc.remove(&(rev.doc, rev.rev_id.clone()));
        self.doc_sequences.remove(&(rev.doc, sequence));
        let names: Vec<_> = self
            .attachments
            .range((sequence, String::new())..)
            .take_while(|((seq, _), _)| *seq == sequence)
            .map(|((_, name), _)| name.clone())
            .collect();
        let attachments = names
            .into_iter()
            .filter_map(|name| {
                let info = self.attachments.remove(&(sequence, name.clone()))?;
                Some((name, info))
            })
            .collect();
        Some(Undo::DeleteRevision {
            sequence,
            rev,
            attachments,
        })
    }

    fn undo(&mut self, op: Undo) {
        match op {
            Undo::InsertDoc(doc) => {
                self.remove_doc(doc);
            }
            Undo::DeleteDoc(doc, doc_id) => self.insert_doc(doc, doc_id),
            Undo::InsertRevision(sequence) => {
                self.remove_revision(sequence);
            }
            Undo::DeleteRevision {
                sequence,
                rev,
                attachments,
            } => {
                for (name, info) in attachments {
                    self.attachments.insert((sequence, name), info);
                }
                self.insert_row(sequence, rev);
            }
            Undo::MarkNotCurrent(sequence) => {
                if let Some(rev) = self.revisions.get_mut(&sequence) {
                    rev.current = true;
                }
            }
            Undo::PutAttachment {
                sequence,
                name,
                previous,
            } => match previous {
                Some(info) => {
                    self.attachments.insert((sequence, name), info);
                }
                None => {
                    self.attachments.remove(&(sequence, name));
                }
            },
        }
    }
}

impl super::Store for Store {
    fn begin(&mut self) -> Result<()> {
        if self.journal.is_some() {
            bail!("transaction already open");
        }
        self.journal = Some(Journal {
            last_sequence: self.tables.last_sequence,
            last_doc: self.tables.last_doc,
            undo: Vec::new(),
        });
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.journal.take().is_none() {
            bail!("no transaction to commit");
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let Some(journal) = self.journal.take() else {
            bail!("no transaction to roll back");
        };
        for op in journal.undo.into_iter().rev() {
            self.tables.undo(op);
        }
        self.tables.last_sequence = journal.last_sequence;
        self.tables.last_doc = journal.last_doc;
        Ok(())
    }

    fn doc_numeric_id(&self, doc_id: &str) -> Result<Option<DocNumericId>> {
        Ok(self.tables.docs.get(doc_id).copied())
    }

    fn insert_doc(&mut self, doc_id: &str) -> Result<DocNumericId, InsertError> {
        let (tables, undo) = self.writable()?;
        if tables.docs.contains_key(doc_id) {
            return Err(InsertError::Duplicate);
        }
        tables.last_doc += 1;
        let doc = tables.last_doc;
        tables.insert_doc(doc, doc_id.to_string());
        undo.push(Undo::InsertDoc(doc));
        Ok(doc)
    }

    fn doc_id(&self, doc: DocNumericId) -> Result<Option<String>> {
        Ok(self.tables.doc_ids.get(&doc).cloned())
    }

    fn documents(&self) -> Result<Vec<DocNumericId>> {
        Ok(self.tables.doc_ids.keys().copied().collect())
    }

    fn delete_document(&mut self, doc: DocNumericId) -> Result<usize> {
        let (tables, undo) = self.writable()?;
        let sequences: Vec<_> = tables
            .doc_sequences
            .range((doc, 0)..=(doc, Sequence::MAX))
            .map(|(_, seq)| *seq)
            .collect();
        let mut removed = 0;
        for sequence in sequences {
            if let Some(op) = tables.remove_revision(sequence) {
                undo.push(op);
                removed += 1;
            }
        }
        if let Some(doc_id) = tables.remove_doc(doc) {
            undo.push(Undo::DeleteDoc(doc, doc_id));
        }
        Ok(removed)
    }

    fn revision(&self, sequence: Sequence) -> Result<Option<StoredRevision>> {
        Ok(self.tables.revisions.get(&sequence).cloned())
    }

    fn sequence_of(&self, doc: DocNumericId, rev_id: &RevisionId) -> Result<Option<Sequence>> {
        Ok(self.tables.revs_by_doc.get(&(doc, rev_id.clone())).copied())
    }

    fn revisions(
        &self,
        doc: DocNumericId,
        only_current: bool,
    ) -> Result<Vec<(Sequence, StoredRevision)>> {
        let tables = &self.tables;
        Ok(tables
            .doc_sequences
            .range((doc, 0)..=(doc, Sequence::MAX))
            .rev()
            .filter_map(|(_, seq)| tables.revisions.get(seq).map(|rev| (*seq, rev)))
            .filter(|(_, rev)| !only_current || rev.current)
            .map(|(seq, rev)| (seq, rev.clone()))
            .collect())
    }

    fn insert_revision(&mut self, rev: StoredRevision) -> Result<Sequence, InsertError> {
        let (tables, undo) = self.writable()?;
        if !tables.doc_ids.contains_key(&rev.doc) {
            return Err(anyhow::anyhow!("unknown document {}", rev.doc).into());
        }
        if tables.revs_by_doc.contains_key(&(rev.doc, rev.rev_id.clone())) {
            return Err(InsertError::Duplicate);
        }
        tables.last_sequence += 1;
        let sequence = tables.last_sequence;
        tables.insert_row(sequence, rev);
        undo.push(Undo::InsertRevision(sequence));
        Ok(sequence)
    }

    fn mark_not_current(&mut self, sequence: Sequence) -> Result<bool> {
        let (tables, undo) = self.writable()?;
        match tables.revisions.get_mut(&sequence) {
            Some(rev) if rev.current => {
                rev.current = false;
                undo.push(Undo::MarkNotCurrent(sequence));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete_revisions(&mut self, sequences: &[Sequence]) -> Result<usize> {
        let (tables, undo) = self.writable()?;
        let mut removed = 0;
        for sequence in sequences {
            if let Some(op) = tables.remove_revision(*sequence) {
                undo.push(op);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn put_attachment(
        &mut self,
        sequence: Sequence,
        name: &str,
        info: &AttachmentInfo,
    ) -> Result<()> {
        let (tables, undo) = self.writable()?;
        if !tables.revisions.contains_key(&sequence) {
            bail!("attachment {name:?} for unknown sequence {sequence}");
        }
        let previous = tables
            .attachments
            .insert((sequence, name.to_string()), info.clone());
        undo.push(Undo::PutAttachment {
            sequence,
            name: name.to_string(),
            previous,
        });
        Ok(())
    }

    fn attachments(&self, sequence: Sequence) -> Result<Vec<(String, AttachmentInfo)>> {
        Ok(self
            .tables
            .attachments
            .range((sequence, String::new())..)
            .take_while(|((seq, _), _)| *seq == sequence)
            .map(|((_, name), info)| (name.clone(), info.clone()))
            .collect())
    }

    fn last_sequence(&self) -> Result<Sequence> {
        Ok(self.tables.last_sequence)
    }

    fn changes_since(
        &self,
        since: Sequence,
        limit: usize,
    ) -> Result<Vec<(Sequence, StoredRevision)>> {
        Ok(self
            .tables
            .revisions
            .range(since.saturating_add(1)..)
            .filter(|(_, rev)| rev.current)
            .take(limit)
            .map(|(seq, rev)| (*seq, rev.clone()))
            .collect())
    }
}
