//! The database handle.

use std::{path::Path, sync::Arc};

use anyhow::Context;
use tracing::info;

use crate::{
    blobs::{BlobStore, FsBlobStore, MemBlobStore},
    config::Options,
    error::Result,
    metrics::Metrics,
    notify::ChangeNotifier,
    store::{self, Store},
    transaction::TransactionState,
    validation::{ValidationContext, Validations},
};

/// File name of the revision store inside a database directory.
pub const STORE_FILE_NAME: &str = "revisions-1.redb";
/// Name of the blob directory inside a database directory.
pub const BLOBS_DIR_NAME: &str = "blobs";

/// A document database with revision trees.
///
/// All writes go through `&mut self`: one database handle is one writer.
/// Writes are grouped into transactions that nest; see
/// [`Database::transaction`].
#[derive(Debug)]
pub struct Database<S: Store> {
    pub(crate) store: S,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) options: Options,
    pub(crate) transaction: TransactionState,
    pub(crate) notifier: ChangeNotifier<S>,
    pub(crate) validations: Validations,
    pub(crate) metrics: Arc<Metrics>,
}

impl Database<store::memory::Store> {
    /// Create a database that only lives in memory, with default options.
    pub fn memory() -> Self {
        Self::new(
            store::memory::Store::new(),
            MemBlobStore::new(),
            Options::default(),
        )
    }
}

impl Database<store::fs::Store> {
    /// Open or create a database in directory `dir`.
    pub fn persistent(dir: impl AsRef<Path>, options: Options) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let store = store::fs::Store::persistent(dir.join(STORE_FILE_NAME))?;
        let blobs = FsBlobStore::open(dir.join(BLOBS_DIR_NAME))?;
        info!("opened database in {}", dir.display());
        Ok(Self::new(store, blobs, options))
    }
}

impl<S: Store> Database<S> {
    /// Create a database on top of a record store and a blob store.
    pub fn new(store: S, blobs: impl BlobStore, options: Options) -> Self {
        Self {
            store,
            blobs: Arc::new(blobs),
            options,
            transaction: TransactionState::default(),
            notifier: ChangeNotifier::default(),
            validations: Validations::default(),
            metrics: Default::default(),
        }
    }

    /// The options this database was opened with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Metrics of this database.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// The attachment blob store.
    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    /// The backing record store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Register a validation callback run before every local write.
    ///
    /// A callback with the same name is replaced.
    pub fn set_validation(
        &mut self,
        name: impl Into<String>,
        callback: impl Fn(&ValidationContext<'_>) -> Result<(), String> + Send + Sync + 'static,
    ) {
        self.validations.set(name, Arc::new(callback));
    }

    /// Remove a validation callback, returning whether it existed.
    pub fn remove_validation(&mut self, name: &str) -> bool {
        self.validations.remove(name)
    }
}
