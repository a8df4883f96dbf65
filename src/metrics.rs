//! Metrics for the revision tree engine

use iroh_metrics::{Counter, MetricsGroup};

/// Metrics tracked by a [`Database`](crate::Database).
#[derive(Debug, Default, MetricsGroup)]
#[metrics(name = "revtree")]
pub struct Metrics {
    /// Revisions created by local writes.
    pub put_revisions: Counter,
    /// Revisions inserted from replication peers, including stubs.
    pub force_inserted: Counter,
    /// Stub revisions created to fill in remote ancestry.
    pub stubs_inserted: Counter,
    /// Writes that failed with a conflict.
    pub conflicts: Counter,
    /// Writes rejected by a validation callback.
    pub validation_rejected: Counter,
    /// Revisions removed by pruning.
    pub revisions_pruned: Counter,
    /// Revisions removed by purging.
    pub revisions_purged: Counter,
    /// Change notifications delivered to observers and subscribers.
    pub changes_delivered: Counter,
    /// Outermost transactions committed.
    pub transactions_committed: Counter,
    /// Outermost transactions rolled back.
    pub transactions_rolled_back: Counter,
}
