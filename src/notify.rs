//! Change notifications.
//!
//! Changes are queued while a transaction is open and delivered after the
//! outermost transaction commits. Observers run synchronously on the writing
//! thread and get mutable access to the database; changes they cause are
//! queued and delivered by the same flush, after the current batch.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::{database::Database, revision::DocumentChange, store::Store};

/// Handle of a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("observer-{_0}")]
pub struct ObserverId(u64);

/// A synchronous change observer.
pub type Observer<S> = Arc<dyn Fn(&mut Database<S>, &DocumentChange) + Send + Sync + 'static>;

pub(crate) struct ChangeNotifier<S: Store> {
    queue: Vec<DocumentChange>,
    observers: Vec<(ObserverId, Observer<S>)>,
    subscribers: Vec<flume::Sender<DocumentChange>>,
    next_id: u64,
    posting: bool,
}

impl<S: Store> Default for ChangeNotifier<S> {
    fn default() -> Self {
        Self {
            queue: Vec::new(),
            observers: Vec::new(),
            subscribers: Vec::new(),
            next_id: 0,
            posting: false,
        }
    }
}

impl<S: Store> std::fmt::Debug for ChangeNotifier<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("queued", &self.queue.len())
            .field(
                "observers",
                &self.observers.iter().map(|(id, _)| id).collect::<Vec<_>>(),
            )
            .field("subscribers", &self.subscribers.len())
            .field("posting", &self.posting)
            .finish()
    }
}

impl<S: Store> ChangeNotifier<S> {
    pub(crate) fn queue(&mut self, change: DocumentChange) {
        self.queue.push(change);
    }

    /// Drop all queued changes, returning how many were dropped.
    pub(crate) fn discard(&mut self) -> usize {
        let n = self.queue.len();
        self.queue.clear();
        n
    }
}

impl<S: Store> Database<S> {
    /// Register an observer called once for every committed change.
    pub fn add_observer(
        &mut self,
        observer: impl Fn(&mut Database<S>, &DocumentChange) + Send + Sync + 'static,
    ) -> ObserverId {
        let id = ObserverId(self.notifier.next_id);
        self.notifier.next_id += 1;
        self.notifier.observers.push((id, Arc::new(observer)));
        id
    }

    /// Unregister an observer. Returns false if it was not registered.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.notifier.observers.len();
        self.notifier.observers.retain(|(other, _)| *other != id);
        self.notifier.observers.len() != before
    }

    /// Subscribe to committed changes through a channel.
    ///
    /// The channel is unbounded. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> flume::Receiver<DocumentChange> {
        let (tx, rx) = flume::unbounded();
        self.notifier.subscribers.push(tx);
        rx
    }

    pub(crate) fn queue_change(&mut self, change: DocumentChange) {
        trace!(doc = %change.doc_id(), rev = %change.revision.rev_id, "queue change");
        self.notifier.queue(change);
    }

    /// Deliver queued changes, unless a transaction is open or a flush is
    /// already running further up the stack.
    pub(crate) fn post_change_notifications(&mut self) {
        if self.notifier.posting || self.in_transaction_scope() {
            return;
        }
        self.notifier.posting = true;
        let mut posting = Posting(self);
        posting.0.deliver_queued();
    }

    fn deliver_queued(&mut self) {
        loop {
            let batch = std::mem::take(&mut self.notifier.queue);
            if batch.is_empty() {
                break;
            }
            debug!(changes = batch.len(), "posting change notifications");
            for change in batch {
                let observers: Vec<_> = self
                    .notifier
                    .observers
                    .iter()
                    .map(|(_, observer)| observer.clone())
                    .collect();
                for observer in observers {
                    observer(self, &change);
                }
                self.notifier
                    .subscribers
                    .retain(|tx| tx.send(change.clone()).is_ok());
                self.metrics.changes_delivered.inc();
            }
        }
    }
}

/// Clears the posting flag when a flush ends, also when an observer panics.
struct Posting<'a, S: Store>(&'a mut Database<S>);

impl<S: Store> Drop for Posting<'_, S> {
    fn drop(&mut self) {
        self.0.notifier.posting = false;
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use testresult::TestResult;

    use super::*;
    use crate::{Body, ChangeSource};

    #[test]
    fn changes_are_delivered_after_commit() -> TestResult {
        let mut db = Database::memory();
        let rx = db.subscribe();
        let mut tx = db.transaction()?;
        tx.put_revision(Some("a"), Body::new(), None, false, false)?;
        tx.put_revision(Some("b"), Body::new(), None, false, false)?;
        assert!(rx.is_empty());
        tx.commit()?;
        let ids: Vec<_> = rx.try_iter().map(|c| c.doc_id().to_string()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(db.metrics().changes_delivered.get(), 2);
        Ok(())
    }

    #[test]
    fn rolled_back_changes_are_not_delivered() -> TestResult {
        let mut db = Database::memory();
        let rx = db.subscribe();
        let mut tx = db.transaction()?;
        tx.put_revision(Some("a"), Body::new(), None, false, false)?;
        tx.rollback()?;
        assert!(rx.is_empty());
        Ok(())
    }

    #[test]
    fn observer_writes_are_delivered_in_same_flush() -> TestResult {
        let mut db = Database::memory();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        db.add_observer(move |db, change| {
            seen2.lock().push(change.doc_id().to_string());
            if change.doc_id() == "a" {
                db.put_revision(Some("from-observer"), Body::new(), None, false, false)
                    .expect("observer write");
            }
        });
        db.put_revision(Some("a"), Body::new(), None, false, false)?;
        assert_eq!(*seen.lock(), ["a", "from-observer"]);
        Ok(())
    }

    #[test]
    fn removed_observer_is_not_called() -> TestResult {
        let mut db = Database::memory();
        let calls = Arc::new(Mutex::new(0));
        let calls2 = calls.clone();
        let id = db.add_observer(move |_, change| {
            assert_eq!(change.source, ChangeSource::Local);
            *calls2.lock() += 1;
        });
        db.put_revision(Some("a"), Body::new(), None, false, false)?;
        assert!(db.remove_observer(id));
        assert!(!db.remove_observer(id));
        db.put_revision(Some("b"), Body::new(), None, false, false)?;
        assert_eq!(*calls.lock(), 1);
        Ok(())
    }

    #[test]
    fn dropped_subscriber_is_removed() -> TestResult {
        let mut db = Database::memory();
        let rx = db.subscribe();
        drop(rx);
        db.put_revision(Some("a"), Body::new(), None, false, false)?;
        assert!(db.notifier.subscribers.is_empty());
        Ok(())
    }

    #[test]
    fn panicking_observer_does_not_stop_later_deliveries() -> TestResult {
        let mut db = Database::memory();
        let rx = db.subscribe();
        let id = db.add_observer(|_, change| {
            if change.doc_id() == "a" {
                panic!("observer failed");
            }
        });
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            db.put_revision(Some("a"), Body::new(), None, false, false)
        }));
        assert!(res.is_err());
        assert!(!db.notifier.posting);
        assert!(!db.in_transaction_scope());

        db.put_revision(Some("b"), Body::new(), None, false, false)?;
        assert!(db.remove_observer(id));
        db.put_revision(Some("c"), Body::new(), None, false, false)?;
        let ids: Vec<_> = rx.try_iter().map(|c| c.doc_id().to_string()).collect();
        assert_eq!(ids, ["b", "c"]);
        Ok(())
    }
}
