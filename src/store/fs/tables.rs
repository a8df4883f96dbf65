#![allow(missing_docs)]
// Table Definitions

use redb::{ReadOnlyTable, ReadTransaction, Table, TableDefinition, WriteTransaction};

/// Table: Documents
/// Key:   `&str` # document id
/// Value: `u64`  # numeric document id
pub const DOCS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("docs-1");

/// Table: Document ids
/// Key:   `u64`  # numeric document id
/// Value: `&str` # document id
pub const DOC_IDS_TABLE: TableDefinition<u64, &str> = TableDefinition::new("doc-ids-1");

/// Table: Revisions
/// Key:   `u64`   # sequence
/// Value: `&[u8]` # postcard encoded `StoredRevision`
pub const REVISIONS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("revisions-1");

/// Table: Revisions by document
/// Key:   `(u64, &str)` # (numeric document id, revision id)
/// Value: `u64`         # sequence
pub const REVS_BY_DOC_TABLE: TableDefinition<(u64, &str), u64> =
    TableDefinition::new("revs-by-doc-1");

/// Table: Sequences by document
/// Key:   `(u64, u64)` # (numeric document id, sequence)
/// Value: `bool`       # current
pub const DOC_SEQUENCES_TABLE: TableDefinition<(u64, u64), bool> =
    TableDefinition::new("doc-sequences-1");

/// Table: Attachments
/// Key:   `(u64, &str)` # (sequence, attachment name)
/// Value: `&[u8]`       # postcard encoded `AttachmentInfo`
pub const ATTACHMENTS_TABLE: TableDefinition<(u64, &str), &[u8]> =
    TableDefinition::new("attachments-1");

/// Table: Counters and schema version
/// Key:   `&str`
/// Value: `u64`
pub const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta-1");

pub const META_LAST_SEQUENCE: &str = "last-sequence";
pub const META_LAST_DOC: &str = "last-doc";
pub const META_SCHEMA_VERSION: &str = "schema-version";

self_cell::self_cell! {
    struct TransactionAndTablesInner {
        owner: WriteTransaction,
        #[covariant]
        dependent: Tables,
    }
}

#[derive(derive_more::Debug)]
pub struct TransactionAndTables {
    #[debug("TransactionAndTablesInner")]
    inner: TransactionAndTablesInner,
}

impl TransactionAndTables {
    pub fn new(tx: WriteTransaction) -> std::result::Result<Self, redb::TableError> {
        Ok(Self {
            inner: TransactionAndTablesInner::try_new(tx, |tx| Tables::new(tx))?,
        })
    }

    pub fn tables(&self) -> &Tables {
        self.inner.borrow_dependent()
    }

    pub fn with_tables_mut<T>(
        &mut self,
        f: impl FnOnce(&mut Tables) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        self.inner.with_dependent_mut(|_, t| f(t))
    }

    pub fn commit(self) -> std::result::Result<(), redb::CommitError> {
        self.inner.into_owner().commit()
    }

    pub fn abort(self) -> std::result::Result<(), redb::StorageError> {
        self.inner.into_owner().abort()
    }
}

#[derive(derive_more::Debug)]
pub struct Tables<'tx> {
    #[debug("docs")]
    pub docs: Table<'tx, &'static str, u64>,
    #[debug("doc_ids")]
    pub doc_ids: Table<'tx, u64, &'static str>,
    #[debug("revisions")]
    pub revisions: Table<'tx, u64, &'static [u8]>,
    #[debug("revs_by_doc")]
    pub revs_by_doc: Table<'tx, (u64, &'static str), u64>,
    #[debug("doc_sequences")]
    pub doc_sequences: Table<'tx, (u64, u64), bool>,
    #[debug("attachments")]
    pub attachments: Table<'tx, (u64, &'static str), &'static [u8]>,
    #[debug("meta")]
    pub meta: Table<'tx, &'static str, u64>,
}

impl<'tx> Tables<'tx> {
    pub fn new(tx: &'tx WriteTransaction) -> Result<Self, redb::TableError> {
        Ok(Self {
            docs: tx.open_table(DOCS_TABLE)?,
            doc_ids: tx.open_table(DOC_IDS_TABLE)?,
            revisions: tx.open_table(REVISIONS_TABLE)?,
            revs_by_doc: tx.open_table(REVS_BY_DOC_TABLE)?,
            doc_sequences: tx.open_table(DOC_SEQUENCES_TABLE)?,
            attachments: tx.open_table(ATTACHMENTS_TABLE)?,
            meta: tx.open_table(META_TABLE)?,
        })
    }
}

#[derive(derive_more::Debug)]
pub struct ReadOnlyTables {
    #[debug("docs")]
    pub docs: ReadOnlyTable<&'static str, u64>,
    #[debug("doc_ids")]
    pub doc_ids: ReadOnlyTable<u64, &'static str>,
    #[debug("revisions")]
    pub revisions: ReadOnlyTable<u64, &'static [u8]>,
    #[debug("revs_by_doc")]
    pub revs_by_doc: ReadOnlyTable<(u64, &'static str), u64>,
    #[debug("doc_sequences")]
    pub doc_sequences: ReadOnlyTable<(u64, u64), bool>,
    #[debug("attachments")]
    pub attachments: ReadOnlyTable<(u64, &'static str), &'static [u8]>,
    #[debug("meta")]
    pub meta: ReadOnlyTable<&'static str, u64>,
}

impl ReadOnlyTables {
    pub fn new(tx: ReadTransaction) -> Result<Self, redb::TableError> {
        Ok(Self {
            docs: tx.open_table(DOCS_TABLE)?,
            doc_ids: tx.open_table(DOC_IDS_TABLE)?,
            revisions: tx.open_table(REVISIONS_TABLE)?,
            revs_by_doc: tx.open_table(REVS_BY_DOC_TABLE)?,
            doc_sequences: tx.open_table(DOC_SEQUENCES_TABLE)?,
            attachments: tx.open_table(ATTACHMENTS_TABLE)?,
            meta: tx.open_table(META_TABLE)?,
        })
    }
}
