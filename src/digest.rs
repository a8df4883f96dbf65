//! Deterministic content digests for new revisions.
//!
//! This is a content fingerprint, not a security primitive. Its only job is
//! that every replica running this crate computes the same id for the same
//! edit: MD5 over the previous id (length byte, then its bytes), the deleted
//! flag, the attachment digests in name order and the canonical body. The
//! layout is this crate's own and does not match other implementations.

use md5::{Digest, Md5};

use crate::rev_id::RevisionId;

/// The next revision id can not be represented.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RevisionIdOverflow {
    /// The previous revision id is longer than 255 bytes.
    #[error("previous revision id is {0} bytes, at most 255 are allowed")]
    Length(usize),
    /// The previous generation is `u32::MAX`.
    #[error("revision generation overflow")]
    Generation,
}

/// Compute the lowercase hex digest of a revision.
///
/// `attachment_digests` must already be sorted by attachment name.
pub fn compute<'a>(
    previous: Option<&RevisionId>,
    deleted: bool,
    attachment_digests: impl IntoIterator<Item = &'a [u8]>,
    body: Option<&[u8]>,
) -> Result<String, RevisionIdOverflow> {
    let mut hasher = Md5::new();
    let previous = previous.map(|id| id.to_string());
    let previous = previous.as_deref().unwrap_or_default().as_bytes();
    let len = u8::try_from(previous.len())
        .map_err(|_| RevisionIdOverflow::Length(previous.len()))?;
    hasher.update([len]);
    hasher.update(previous);
    hasher.update([deleted as u8]);
    for digest in attachment_digests {
        hasher.update(digest);
    }
    if let Some(body) = body {
        hasher.update(body);
    }
    Ok(data_encoding::HEXLOWER.encode(&hasher.finalize()))
}

/// Compute the id of the revision following `previous`.
pub fn next_revision_id<'a>(
    previous: Option<&RevisionId>,
    deleted: bool,
    attachment_digests: impl IntoIterator<Item = &'a [u8]>,
    body: Option<&[u8]>,
) -> Result<RevisionId, RevisionIdOverflow> {
    let generation = previous
        .map(|id| id.generation())
        .unwrap_or_default()
        .checked_add(1)
        .ok_or(RevisionIdOverflow::Generation)?;
    let digest = compute(previous, deleted, attachment_digests, body)?;
    RevisionId::new(generation, digest).map_err(|_| RevisionIdOverflow::Generation)
}
