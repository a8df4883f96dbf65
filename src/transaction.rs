//! Nested transactions.
//!
//! Only the outermost transaction talks to the backing store. If any nested
//! scope ends without committing, the whole outermost transaction is rolled
//! back: the store has no savepoints, so the writes of the failed scope can
//! not be undone on their own.

use std::ops::{Deref, DerefMut};

use anyhow::anyhow;
use tracing::{debug, trace, warn};

use crate::{
    database::Database,
    error::{Error, Result},
    store::Store,
};

#[derive(Debug, Default)]
pub(crate) struct TransactionState {
    depth: usize,
    rollback_only: bool,
}

impl TransactionState {
    pub(crate) fn depth(&self) -> usize {
        self.depth
    }
}

/// An open transaction scope.
///
/// Derefs to the [`Database`], so writes made through it, including further
/// nested transactions, join this transaction. Ends with [`Transaction::commit`];
/// dropping it without committing rolls back.
#[derive(Debug)]
pub struct Transaction<'a, S: Store> {
    db: &'a mut Database<S>,
    done: bool,
}

impl<S: Store> Transaction<'_, S> {
    /// End this scope successfully. Commits if this is the outermost scope.
    pub fn commit(mut self) -> Result<()> {
        self.done = true;
        self.db.end_transaction(true)
    }

    /// End this scope unsuccessfully. The outermost transaction will be rolled back.
    pub fn rollback(mut self) -> Result<()> {
        self.done = true;
        self.db.end_transaction(false)
    }
}

impl<S: Store> Deref for Transaction<'_, S> {
    type Target = Database<S>;

    fn deref(&self) -> &Self::Target {
        self.db
    }
}

impl<S: Store> DerefMut for Transaction<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.db
    }
}

impl<S: Store> Drop for Transaction<'_, S> {
    fn drop(&mut self) {
        if !self.done {
            if let Err(err) = self.db.end_transaction(false) {
                warn!("failed to roll back dropped transaction: {err:#}");
            }
        }
    }
}

impl<S: Store> Database<S> {
    /// Open a transaction scope.
    pub fn transaction(&mut self) -> Result<Transaction<'_, S>> {
        self.begin_transaction()?;
        Ok(Transaction {
            db: self,
            done: false,
        })
    }

    /// Run `f` in a transaction scope, committing if it returns `Ok`.
    pub fn in_transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let mut tx = self.transaction()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!("rollback failed: {rollback_err:#}");
                }
                Err(err)
            }
        }
    }

    /// Whether a transaction is open.
    pub fn in_transaction_scope(&self) -> bool {
        self.transaction.depth > 0
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if self.transaction.depth == 0 {
            self.store.begin()?;
        }
        self.transaction.depth += 1;
        trace!(depth = self.transaction.depth, "begin transaction");
        Ok(())
    }

    fn end_transaction(&mut self, commit: bool) -> Result<()> {
        let Some(depth) = self.transaction.depth.checked_sub(1) else {
            return Err(anyhow!("no transaction to end").into());
        };
        trace!(depth, commit, "end transaction");
        self.transaction.depth = depth;
        if !commit {
            self.transaction.rollback_only = true;
        }
        if depth > 0 {
            return Ok(());
        }

        let rollback_only = std::mem::take(&mut self.transaction.rollback_only);
        if !rollback_only {
            if let Err(err) = self.store.commit() {
                let discarded = self.notifier.discard();
                self.metrics.transactions_rolled_back.inc();
                debug!(discarded, "commit failed, discarded queued changes");
                return Err(err.context("failed to commit transaction").into());
            }
            self.metrics.transactions_committed.inc();
            self.post_change_notifications();
            return Ok(());
        }

        let discarded = self.notifier.discard();
        self.metrics.transactions_rolled_back.inc();
        debug!(discarded, "rolling back transaction");
        self.store.rollback()?;
        if commit {
            Err(Error::Internal(anyhow!(
                "transaction rolled back because a nested scope failed"
            )))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;
    use crate::{Body, Database, RevisionId};

    #[test]
    fn nested_commit_is_deferred() -> TestResult {
        let mut db = Database::memory();
        let mut outer = db.transaction()?;
        outer.put_revision(Some("a"), Body::new(), None, false, false)?;
        {
            let mut inner = outer.transaction()?;
            inner.put_revision(Some("b"), Body::new(), None, false, false)?;
            inner.commit()?;
        }
        assert!(outer.in_transaction_scope());
        outer.commit()?;
        assert!(!db.in_transaction_scope());
        assert!(db.get_document("a").is_ok());
        assert!(db.get_document("b").is_ok());
        Ok(())
    }

    #[test]
    fn dropped_guard_rolls_back() -> TestResult {
        let mut db = Database::memory();
        {
            let mut tx = db.transaction()?;
            tx.put_revision(Some("a"), Body::new(), None, false, false)?;
        }
        assert!(!db.in_transaction_scope());
        assert!(matches!(db.get_document("a"), Err(Error::NotFound(_))));
        assert_eq!(db.last_sequence()?, 0);
        Ok(())
    }

    #[test]
    fn failed_inner_scope_rolls_back_outer() -> TestResult {
        let mut db = Database::memory();
        let res = db.in_transaction(|db| {
            db.put_revision(Some("a"), Body::new(), None, false, false)?;
            let missing = RevisionId::parse("1-missing")?;
            // fails inside its own nested scope, the caller ignores the error
            let inner = db.put_revision(Some("b"), Body::new(), Some(&missing), false, false);
            assert!(inner.is_err());
            Ok(())
        });
        assert!(matches!(res, Err(Error::Internal(_))));
        assert!(matches!(db.get_document("a"), Err(Error::NotFound(_))));
        Ok(())
    }
}
