//! Attachment metadata of revisions.
//!
//! A body may declare attachments in its `_attachments` property. Each entry
//! is one of
//!
//! - `{"data": "<base64>", "content_type": ..}`: new content, written to the
//!   blob store,
//! - `{"stub": true}`: unchanged content, inherited from the parent revision,
//! - `{"digest": "sha1-..", "length": ..}`: content that is already in the
//!   blob store, for example because it was transferred ahead of the revision.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{
    blobs::{BlobKey, BlobStore},
    error::{Error, Result},
    rev_id::Generation,
};

/// Metadata of one attachment of a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    /// Key of the content in the blob store.
    pub digest: BlobKey,
    /// Length of the content in bytes.
    pub length: u64,
    /// MIME type, if declared.
    pub content_type: Option<String>,
    /// Generation of the revision that added this content.
    pub revpos: Generation,
}

impl AttachmentInfo {
    /// The stub form returned in document properties.
    pub fn to_stub(&self) -> Value {
        let mut stub = json!({
            "stub": true,
            "digest": self.digest.to_string(),
            "length": self.length,
            "revpos": self.revpos,
        });
        if let (Some(content_type), Value::Object(map)) = (&self.content_type, &mut stub) {
            map.insert("content_type".into(), content_type.clone().into());
        }
        stub
    }
}

/// Attachments of a revision, by name.
pub type Attachments = BTreeMap<String, AttachmentInfo>;

/// Resolve the `_attachments` property of a new revision.
///
/// `inherited` are the attachments of the closest stored ancestor, used to
/// resolve stubs. New content is written to `blobs`.
pub(crate) fn resolve(
    declared: Map<String, Value>,
    generation: Generation,
    inherited: &Attachments,
    blobs: &dyn BlobStore,
) -> Result<Attachments> {
    let mut out = Attachments::new();
    for (name, entry) in declared {
        let Value::Object(entry) = entry else {
            return Err(Error::bad_request(format!("invalid attachment {name:?}")));
        };
        let content_type = entry
            .get("content_type")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let info = if entry.get("stub").and_then(Value::as_bool) == Some(true) {
            inherited.get(&name).cloned().ok_or_else(|| {
                Error::bad_request(format!("attachment stub {name:?} has no stored content"))
            })?
        } else if let Some(data) = entry.get("data") {
            let data = data
                .as_str()
                .and_then(|data| data_encoding::BASE64.decode(data.as_bytes()).ok())
                .ok_or_else(|| {
                    Error::bad_request(format!("attachment {name:?} has invalid base64 data"))
                })?;
            let digest = blobs.put(&data)?;
            AttachmentInfo {
                digest,
                length: data.len() as u64,
                content_type,
                revpos: generation,
            }
        } else if let Some(digest) = entry.get("digest").and_then(Value::as_str) {
            let digest: BlobKey = digest
                .parse()
                .map_err(|err| Error::bad_request(format!("attachment {name:?}: {err}")))?;
            if !blobs.contains(&digest)? {
                return Err(Error::bad_request(format!(
                    "attachment {name:?} refers to missing content {digest}"
                )));
            }
            let length = match entry.get("length").and_then(Value::as_u64) {
                Some(length) => length,
                None => blobs.get(&digest)?.map(|data| data.len() as u64).unwrap_or_default(),
            };
            let revpos = entry
                .get("revpos")
                .and_then(Value::as_u64)
                .and_then(|revpos| Generation::try_from(revpos).ok())
                .unwrap_or(generation);
            AttachmentInfo {
                digest,
                length,
                content_type,
                revpos,
            }
        } else {
            return Err(Error::bad_request(format!(
                "attachment {name:?} has neither data, digest nor stub"
            )));
        };
        out.insert(name, info);
    }
    Ok(out)
}

/// Digests of `attachments` in name order, as fed into revision digests.
pub(crate) fn digests(attachments: &Attachments) -> impl Iterator<Item = &[u8]> {
    attachments.values().map(|info| info.digest.as_bytes().as_slice())
}

/// The `_attachments` property for `attachments`.
pub fn to_property(attachments: &Attachments) -> Value {
    Value::Object(
        attachments
            .iter()
            .map(|(name, info)| (name.clone(), info.to_stub()))
            .collect(),
    )
}
