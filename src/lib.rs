//! Revision trees for an embedded, multi-master replicable document store.
//!
//! Every document is a tree of revisions. Local edits append to the winning
//! leaf with [`Database::put_revision`]; revisions pulled from peers are
//! grafted in with their ancestry by [`Database::force_insert`]. Concurrent
//! edits on different replicas become sibling leaves, and every replica picks
//! the same winner among them. Old history is bounded by [`Database::prune`].
//!
//! ```
//! use revtree::{Body, Database};
//!
//! # fn main() -> revtree::Result<()> {
//! let mut db = Database::memory();
//! let body = Body::from_value(serde_json::json!({"title": "hello"}))?;
//! let rev = db.put_revision(Some("doc"), body, None, false, false)?;
//! assert_eq!(rev.generation(), 1);
//! assert_eq!(db.get_document("doc")?.rev_id, rev.rev_id);
//! # Ok(())
//! # }
//! ```
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod attachments;
pub mod blobs;
pub mod body;
pub mod config;
mod conflict;
mod database;
pub mod digest;
mod error;
pub mod history;
mod insert;
pub mod metrics;
mod notify;
mod prune;
mod records;
pub mod rev_id;
mod revision;
pub mod store;
mod transaction;
pub mod validation;

pub use body::Body;
pub use config::Options;
pub use conflict::pick_winner;
pub use database::{BLOBS_DIR_NAME, Database, STORE_FILE_NAME};
pub use error::{Error, InsertError, Result};
pub use history::RevisionHistory;
pub use insert::RemoteRevision;
pub use metrics::Metrics;
pub use notify::{Observer, ObserverId};
pub use prune::PURGE_ALL;
pub use rev_id::{Generation, MalformedRevisionId, RevisionId};
pub use revision::{
    ChangeSource, DESIGN_DOC_PREFIX, DocNumericId, DocumentChange, Revision, RevisionList,
    Sequence, is_valid_doc_id,
};
pub use transaction::Transaction;
pub use validation::ValidationContext;
