//! Pruning and purging revision history.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, debug_span, info};

use crate::{
    database::Database,
    error::{Error, Result},
    rev_id::RevisionId,
    revision::DocNumericId,
    store::Store,
};

/// Purges every revision of a document when given as the revision list.
pub const PURGE_ALL: &str = "*";

impl<S: Store> Database<S> {
    /// Remove old history from every document.
    ///
    /// Of each document only the newest `max_depth` generations of non-leaf
    /// revisions are kept. Leaves are never removed, so a short branch can
    /// lose all of its ancestors. Returns the number of revisions removed.
    pub fn prune(&mut self, max_depth: u32) -> Result<usize> {
        if max_depth == 0 {
            return Err(Error::bad_request("max depth must be at least 1"));
        }
        let _guard = debug_span!("prune", max_depth).entered();
        let pruned = self.in_transaction(|db| {
            let mut pruned = 0;
            for doc in db.store.documents()? {
                pruned += db.prune_document(doc, max_depth)?;
            }
            Ok(pruned)
        })?;
        info!(pruned, "pruned revisions");
        Ok(pruned)
    }

    pub(crate) fn prune_after_insert(&mut self, doc: DocNumericId) -> Result<()> {
        if self.options.prune_on_insert && self.options.max_rev_tree_depth > 0 {
            self.prune_document(doc, self.options.max_rev_tree_depth)?;
        }
        Ok(())
    }

    pub(crate) fn prune_document(&mut self, doc: DocNumericId, max_depth: u32) -> Result<usize> {
        let rows = self.store.revisions(doc, false)?;
        let generations = rows.iter().map(|(_, row)| row.rev_id.generation());
        let (Some(min), Some(max)) = (generations.clone().min(), generations.max()) else {
            return Ok(0);
        };
        if max - min < max_depth {
            return Ok(0);
        }
        let cutoff = max - max_depth;
        let doomed: Vec<_> = rows
            .iter()
            .filter(|(_, row)| !row.current && row.rev_id.generation() <= cutoff)
            .map(|(sequence, _)| *sequence)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        let pruned = self.store.delete_revisions(&doomed)?;
        self.metrics.revisions_pruned.inc_by(pruned as u64);
        debug!(doc, pruned, cutoff, "pruned document");
        Ok(pruned)
    }

    /// Permanently remove revisions.
    ///
    /// For each document, the listed revisions are removed together with
    /// their ancestors that are not shared with a remaining revision.
    /// [`PURGE_ALL`] removes the whole document. Returns the purged revision
    /// ids per document.
    ///
    /// Purging is local: it emits no [`DocumentChange`] and peers are not
    /// told about it.
    ///
    /// [`DocumentChange`]: crate::DocumentChange
    pub fn purge(
        &mut self,
        docs: BTreeMap<String, Vec<String>>,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let _guard = debug_span!("purge", docs = docs.len()).entered();
        self.in_transaction(|db| {
            let mut purged = BTreeMap::new();
            for (doc_id, rev_ids) in docs {
                let revs = db.purge_document(&doc_id, &rev_ids)?;
                if !revs.is_empty() {
                    purged.insert(doc_id, revs);
                }
            }
            Ok(purged)
        })
    }

    fn purge_document(&mut self, doc_id: &str, rev_ids: &[String]) -> Result<Vec<String>> {
        let Some(doc) = self.store.doc_numeric_id(doc_id)? else {
            return Ok(Vec::new());
        };
        if rev_ids.iter().any(|id| id == PURGE_ALL) {
            let removed = self.store.delete_document(doc)?;
            self.metrics.revisions_purged.inc_by(removed as u64);
            info!(%doc_id, removed, "purged document");
            return Ok(vec![PURGE_ALL.to_string()]);
        }
        let targets = rev_ids
            .iter()
            .map(|id| RevisionId::parse(id))
            .collect::<Result<BTreeSet<_>, _>>()?;

        // newest first, so children are seen before their parents
        let rows = self.store.revisions(doc, false)?;
        let mut purge = BTreeSet::new();
        let mut keep = BTreeSet::new();
        for (sequence, row) in &rows {
            if purge.contains(sequence)
                || (targets.contains(&row.rev_id) && !keep.contains(sequence))
            {
                purge.insert(*sequence);
                if let Some(parent) = row.parent {
                    purge.insert(parent);
                }
            } else {
                purge.remove(sequence);
                if let Some(parent) = row.parent {
                    keep.insert(parent);
                }
            }
        }
        let doomed: Vec<_> = purge.difference(&keep).copied().collect();
        if doomed.is_empty() {
            return Ok(Vec::new());
        }
        let purged: Vec<String> = rows
            .iter()
            .filter(|(sequence, _)| doomed.contains(sequence))
            .map(|(_, row)| row.rev_id.to_string())
            .collect();
        let removed = self.store.delete_revisions(&doomed)?;
        self.metrics.revisions_purged.inc_by(removed as u64);
        info!(%doc_id, removed, "purged revisions");
        Ok(purged)
    }
}
