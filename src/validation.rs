//! Validation callbacks run before local writes.

use std::{collections::BTreeMap, sync::Arc};

use crate::{body::Body, rev_id::RevisionId, revision::Revision};

/// The candidate revision handed to validation callbacks.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Id of the document.
    pub doc_id: &'a str,
    /// Id the new revision will get.
    pub rev_id: &'a RevisionId,
    /// Whether the new revision is a deletion.
    pub deleted: bool,
    /// Body of the new revision, without special properties.
    pub body: &'a Body,
    /// The revision the candidate replaces, if any.
    pub parent: Option<&'a Revision>,
}

/// A validation callback. Returning an error rejects the revision with the
/// given reason.
pub type ValidationFn =
    Arc<dyn Fn(&ValidationContext<'_>) -> Result<(), String> + Send + Sync + 'static>;

/// Named validation callbacks, run in name order.
#[derive(Clone, Default)]
pub struct Validations {
    callbacks: BTreeMap<String, ValidationFn>,
}

impl std::fmt::Debug for Validations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.callbacks.keys()).finish()
    }
}

impl Validations {
    /// Register a callback, replacing any callback with the same name.
    pub fn set(&mut self, name: impl Into<String>, callback: ValidationFn) {
        self.callbacks.insert(name.into(), callback);
    }

    /// Remove a callback.
    pub fn remove(&mut self, name: &str) -> bool {
        self.callbacks.remove(name).is_some()
    }

    /// Whether no callback is registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Run all callbacks, returning the first rejection as `(name, reason)`.
    pub fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), (String, String)> {
        for (name, callback) in &self.callbacks {
            callback(ctx).map_err(|reason| (name.clone(), reason))?;
        }
        Ok(())
    }
}
