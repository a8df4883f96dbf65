//! On disk storage for revision trees, backed by [`redb`].

use std::path::Path;

use anyhow::{Context, Result, bail};
use redb::{Database, ReadableTable, ReadableTableMetadata};
use tracing::{debug, info};

use self::tables::{
    META_LAST_DOC, META_LAST_SEQUENCE, META_SCHEMA_VERSION, ReadOnlyTables, Tables,
    TransactionAndTables,
};
use super::StoredRevision;
use crate::{
    attachments::AttachmentInfo,
    error::InsertError,
    rev_id::RevisionId,
    revision::{DocNumericId, Sequence},
};

mod tables;

const SCHEMA_VERSION: u64 = 1;

/// [`super::Store`] persisted in a redb database file.
#[derive(derive_more::Debug)]
pub struct Store {
    #[debug("redb::Database")]
    db: Database,
    current: CurrentTransaction,
}

#[derive(derive_more::Debug, Default)]
enum CurrentTransaction {
    #[default]
    None,
    Write(TransactionAndTables),
}

/// Run a read against the open write transaction, or a fresh read snapshot if
/// there is none.
macro_rules! read {
    ($store:expr, |$tables:ident| $body:expr) => {
        match &$store.current {
            CurrentTransaction::Write(tx) => {
                let $tables = tx.tables();
                $body
            }
            CurrentTransaction::None => {
                let $tables = &$store.snapshot()?;
                $body
            }
        }
    };
}

impl Store {
    /// Create or open a store from a `path` to a database file.
    ///
    /// The file will be created if it does not exist, otherwise it will be opened.
    pub fn persistent(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        info!("opening revision store at {}", path.display());
        let db = Database::create(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Self::new_impl(db)
    }

    /// Create a new store that only lives in memory.
    pub fn in_memory() -> Result<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::new_impl(db)
    }

    fn new_impl(db: Database) -> Result<Self> {
        // Setup all tables
        let write_tx = db.begin_write()?;
        {
            let mut tables = Tables::new(&write_tx)?;
            let version = tables.meta.get(META_SCHEMA_VERSION)?.map(|v| v.value());
            match version {
                None => {
                    tables.meta.insert(META_SCHEMA_VERSION, SCHEMA_VERSION)?;
                    debug!("initialized revision store schema v{SCHEMA_VERSION}");
                }
                Some(SCHEMA_VERSION) => {}
                Some(version) => {
                    bail!("unsupported revision store schema version {version}")
                }
            }
        }
        write_tx.commit()?;
        Ok(Self {
            db,
            current: CurrentTransaction::None,
        })
    }

    fn snapshot(&self) -> Result<ReadOnlyTables> {
        let tx = self.db.begin_read()?;
        Ok(ReadOnlyTables::new(tx)?)
    }

    fn tables_mut(&mut self) -> Result<&mut TransactionAndTables> {
        match &mut self.current {
            CurrentTransaction::Write(tx) => Ok(tx),
            CurrentTransaction::None => bail!("write outside of a transaction"),
        }
    }
}

fn decode_revision(bytes: &[u8]) -> Result<StoredRevision> {
    postcard::from_bytes(bytes).context("failed to decode revision row")
}

fn get_revision(
    revisions: &impl ReadableTable<u64, &'static [u8]>,
    sequence: Sequence,
) -> Result<Option<StoredRevision>> {
    revisions
        .get(sequence)?
        .map(|row| decode_revision(row.value()))
        .transpose()
}

fn get_meta(meta: &impl ReadableTable<&'static str, u64>, key: &str) -> Result<u64> {
    Ok(meta.get(key)?.map(|v| v.value()).unwrap_or_default())
}

fn doc_sequences(
    doc_sequences: &impl ReadableTable<(u64, u64), bool>,
    doc: DocNumericId,
) -> Result<Vec<(Sequence, bool)>> {
    let mut out = Vec::new();
    for item in doc_sequences.range((doc, 0)..=(doc, u64::MAX))? {
        let (key, current) = item?;
        out.push((key.value().1, current.value()));
    }
    Ok(out)
}

impl Tables<'_> {
    fn remove_revision(&mut self, sequence: Sequence) -> Result<bool> {
        let Some(rev) = get_revision(&self.revisions, sequence)? else {
            return Ok(false);
        };
        self.revisions.remove(sequence)?;
        let rev_id = rev.rev_id.to_string();
        self.revs_by_doc.remove((rev.doc, rev_id.as_str()))?;
        self.doc_sequences.remove((rev.doc, sequence))?;
        let mut names = Vec::new();
        for item in self.attachments.range((sequence, "")..)? {
            let (key, _) = item?;
            let (seq, name) = key.value();
            if seq != sequence {
                break;
            }
            names.push(name.to_string());
        }
        for name in names {
            self.attachments.remove((sequence, name.as_str()))?;
        }
        Ok(true)
    }
}

impl super::Store for Store {
    fn begin(&mut self) -> Result<()> {
        if matches!(self.current, CurrentTransaction::Write(_)) {
            bail!("transaction already open");
        }
        let tx = self.db.begin_write()?;
        self.current = CurrentTransaction::Write(TransactionAndTables::new(tx)?);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        match std::mem::take(&mut self.current) {
            CurrentTransaction::Write(tx) => tx.commit().context("failed to commit"),
            CurrentTransaction::None => bail!("no transaction to commit"),
        }
    }

    fn rollback(&mut self) -> Result<()> {
        match std::mem::take(&mut self.current) {
            CurrentTransaction::Write(tx) => tx.abort().context("failed to roll back"),
            CurrentTransaction::None => bail!("no transaction to roll back"),
        }
    }

    fn doc_numeric_id(&self, doc_id: &str) -> Result<Option<DocNumericId>> {
        read!(self, |t| Ok(t.docs.get(doc_id)?.map(|v| v.value())))
    }

    fn insert_doc(&mut self, doc_id: &str) -> Result<DocNumericId, InsertError> {
        let tx = self.tables_mut()?;
        let doc = tx.with_tables_mut(|t| {
            if t.docs.get(doc_id)?.is_some() {
                return Ok(None);
            }
            let doc = get_meta(&t.meta, META_LAST_DOC)? + 1;
            t.meta.insert(META_LAST_DOC, doc)?;
            t.docs.insert(doc_id, doc)?;
            t.doc_ids.insert(doc, doc_id)?;
            Ok(Some(doc))
        })?;
        doc.ok_or(InsertError::Duplicate)
    }

    fn doc_id(&self, doc: DocNumericId) -> Result<Option<String>> {
        read!(self, |t| Ok(t.doc_ids.get(doc)?.map(|v| v.value().to_string())))
    }

    fn documents(&self) -> Result<Vec<DocNumericId>> {
        read!(self, |t| {
            let mut out = Vec::with_capacity(t.doc_ids.len()? as usize);
            for item in t.doc_ids.iter()? {
                out.push(item?.0.value());
            }
            Ok(out)
        })
    }

    fn delete_document(&mut self, doc: DocNumericId) -> Result<usize> {
        self.tables_mut()?.with_tables_mut(|t| {
            let mut removed = 0;
            for (sequence, _) in doc_sequences(&t.doc_sequences, doc)? {
                if t.remove_revision(sequence)? {
                    removed += 1;
                }
            }
            let doc_id = t.doc_ids.remove(doc)?.map(|v| v.value().to_string());
            if let Some(doc_id) = doc_id {
                t.docs.remove(doc_id.as_str())?;
            }
            Ok(removed)
        })
    }

    fn revision(&self, sequence: Sequence) -> Result<Option<StoredRevision>> {
        read!(self, |t| get_revision(&t.revisions, sequence))
    }

    fn sequence_of(&self, doc: DocNumericId, rev_id: &RevisionId) -> Result<Option<Sequence>> {
        let rev_id = rev_id.to_string();
        read!(self, |t| {
            let sequence = t.revs_by_doc.get((doc, rev_id.as_str()))?;
            Ok(sequence.map(|v| v.value()))
        })
    }

    fn revisions(
        &self,
        doc: DocNumericId,
        only_current: bool,
    ) -> Result<Vec<(Sequence, StoredRevision)>> {
        read!(self, |t| {
            let mut out = Vec::new();
            for (sequence, current) in doc_sequences(&t.doc_sequences, doc)?.into_iter().rev() {
                if only_current && !current {
                    continue;
                }
                let rev = get_revision(&t.revisions, sequence)?
                    .with_context(|| format!("missing revision row {sequence}"))?;
                out.push((sequence, rev));
            }
            Ok(out)
        })
    }

    fn insert_revision(&mut self, rev: StoredRevision) -> Result<Sequence, InsertError> {
        let encoded = postcard::to_stdvec(&rev).map_err(anyhow::Error::from)?;
        let rev_id = rev.rev_id.to_string();
        let tx = self.tables_mut()?;
        let sequence = tx.with_tables_mut(|t| {
            if t.doc_ids.get(rev.doc)?.is_none() {
                bail!("unknown document {}", rev.doc);
            }
            if t.revs_by_doc.get((rev.doc, rev_id.as_str()))?.is_some() {
                return Ok(None);
            }
            let sequence = get_meta(&t.meta, META_LAST_SEQUENCE)? + 1;
            t.meta.insert(META_LAST_SEQUENCE, sequence)?;
            t.revisions.insert(sequence, encoded.as_slice())?;
            t.revs_by_doc.insert((rev.doc, rev_id.as_str()), sequence)?;
            t.doc_sequences.insert((rev.doc, sequence), rev.current)?;
            Ok(Some(sequence))
        })?;
        sequence.ok_or(InsertError::Duplicate)
    }

    fn mark_not_current(&mut self, sequence: Sequence) -> Result<bool> {
        self.tables_mut()?.with_tables_mut(|t| {
            let Some(mut rev) = get_revision(&t.revisions, sequence)? else {
                return Ok(false);
            };
            if !rev.current {
                return Ok(false);
            }
            rev.current = false;
            let encoded = postcard::to_stdvec(&rev)?;
            t.revisions.insert(sequence, encoded.as_slice())?;
            t.doc_sequences.insert((rev.doc, sequence), false)?;
            Ok(true)
        })
    }

    fn delete_revisions(&mut self, sequences: &[Sequence]) -> Result<usize> {
        self.tables_mut()?.with_tables_mut(|t| {
            let mut removed = 0;
            for sequence in sequences {
                if t.remove_revision(*sequence)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    fn put_attachment(
        &mut self,
        sequence: Sequence,
        name: &str,
        info: &AttachmentInfo,
    ) -> Result<()> {
        let encoded = postcard::to_stdvec(info)?;
        self.tables_mut()?.with_tables_mut(|t| {
            if t.revisions.get(sequence)?.is_none() {
                bail!("attachment {name:?} for unknown sequence {sequence}");
            }
            t.attachments.insert((sequence, name), encoded.as_slice())?;
            Ok(())
        })
    }

    fn attachments(&self, sequence: Sequence) -> Result<Vec<(String, AttachmentInfo)>> {
        read!(self, |t| {
            let mut out = Vec::new();
            for item in t.attachments.range((sequence, "")..)? {
                let (key, value) = item?;
                let (seq, name) = key.value();
                if seq != sequence {
                    break;
                }
                let info = postcard::from_bytes(value.value())
                    .context("failed to decode attachment row")?;
                out.push((name.to_string(), info));
            }
            Ok(out)
        })
    }

    fn last_sequence(&self) -> Result<Sequence> {
        read!(self, |t| get_meta(&t.meta, META_LAST_SEQUENCE))
    }

    fn changes_since(
        &self,
        since: Sequence,
        limit: usize,
    ) -> Result<Vec<(Sequence, StoredRevision)>> {
        read!(self, |t| {
            let mut out = Vec::new();
            for item in t.revisions.range(since.saturating_add(1)..)? {
                if out.len() >= limit {
                    break;
                }
                let (sequence, row) = item?;
                let rev = decode_revision(row.value())?;
                if rev.current {
                    out.push((sequence.value(), rev));
                }
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;
    use crate::store::Store as _;

    fn row(doc: DocNumericId, rev: &str, parent: Option<Sequence>) -> StoredRevision {
        StoredRevision {
            doc,
            rev_id: RevisionId::parse(rev).unwrap(),
            parent,
            current: true,
            deleted: false,
            has_attachments: false,
            body: Some(b"{}".to_vec()),
        }
    }

    #[test]
    fn persists_across_reopen() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("revs.redb");
        {
            let mut store = Store::persistent(&path)?;
            store.begin()?;
            let doc = store.insert_doc("foo")?;
            let first = store.insert_revision(row(doc, "1-aaa", None))?;
            store.insert_revision(row(doc, "2-bbb", Some(first)))?;
            assert!(store.mark_not_current(first)?);
            store.commit()?;
        }
        let store = Store::persistent(&path)?;
        let doc = store.doc_numeric_id("foo")?.expect("doc exists");
        let revs = store.revisions(doc, false)?;
        assert_eq!(revs.len(), 2);
        assert_eq!(revs[0].1.rev_id.to_string(), "2-bbb");
        assert_eq!(store.revisions(doc, true)?.len(), 1);
        assert_eq!(store.last_sequence()?, 2);
        assert_eq!(revs[0].1.parent, Some(1));
        Ok(())
    }

    #[test]
    fn rollback_discards_rows_and_counters() -> TestResult {
        let mut store = Store::in_memory()?;
        store.begin()?;
        let doc = store.insert_doc("foo")?;
        store.insert_revision(row(doc, "1-aaa", None))?;
        store.rollback()?;
        assert_eq!(store.doc_numeric_id("foo")?, None);
        assert_eq!(store.last_sequence()?, 0);
        Ok(())
    }

    #[test]
    fn writes_require_transaction() -> TestResult {
        let mut store = Store::in_memory()?;
        assert!(store.insert_doc("foo").is_err());
        Ok(())
    }

    #[test]
    fn duplicates() -> TestResult {
        let mut store = Store::in_memory()?;
        store.begin()?;
        let doc = store.insert_doc("foo")?;
        assert!(matches!(store.insert_doc("foo"), Err(InsertError::Duplicate)));
        store.insert_revision(row(doc, "1-aaa", None))?;
        assert!(matches!(
            store.insert_revision(row(doc, "1-aaa", None)),
            Err(InsertError::Duplicate)
        ));
        store.commit()?;
        Ok(())
    }
}
