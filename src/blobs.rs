//! Content addressed storage for attachment bodies.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

const KEY_PREFIX: &str = "sha1-";

/// Key of a blob, the SHA-1 of its content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlobKey([u8; 20]);

impl BlobKey {
    /// Compute the key of `data`.
    pub fn new(data: impl AsRef<[u8]>) -> Self {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&Sha1::digest(data.as_ref()));
        Self(bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase hex encoding, used as file name.
    pub fn to_hex(&self) -> String {
        data_encoding::HEXLOWER.encode(&self.0)
    }
}

impl From<[u8; 20]> for BlobKey {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{KEY_PREFIX}{}", data_encoding::BASE64.encode(&self.0))
    }
}

impl fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobKey({self})")
    }
}

impl FromStr for BlobKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s
            .strip_prefix(KEY_PREFIX)
            .with_context(|| format!("unsupported digest {s:?}"))?;
        let bytes = data_encoding::BASE64.decode(encoded.as_bytes())?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("invalid digest length"))?;
        Ok(Self(bytes))
    }
}

/// Storage of attachment bodies by content digest.
pub trait BlobStore: fmt::Debug + Send + Sync + 'static {
    /// Store `data`, returning its key. Storing the same content twice is a no-op.
    fn put(&self, data: &[u8]) -> Result<BlobKey>;

    /// Whether a blob with this key is present.
    fn contains(&self, key: &BlobKey) -> Result<bool>;

    /// Read a blob.
    fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>>;
}

/// In-memory blob store.
#[derive(Debug, Clone, Default)]
pub struct MemBlobStore {
    blobs: Arc<RwLock<BTreeMap<BlobKey, Arc<[u8]>>>>,
}

impl MemBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemBlobStore {
    fn put(&self, data: &[u8]) -> Result<BlobKey> {
        let key = BlobKey::new(data);
        self.blobs.write().entry(key).or_insert_with(|| data.into());
        Ok(key)
    }

    fn contains(&self, key: &BlobKey) -> Result<bool> {
        Ok(self.blobs.read().contains_key(key))
    }

    fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().get(key).map(|data| data.to_vec()))
    }
}

/// Blob store keeping one file per blob in a directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    dir: PathBuf,
}

impl FsBlobStore {
    /// Open the store, creating `dir` if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create blob directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path(&self, key: &BlobKey) -> PathBuf {
        self.dir.join(key.to_hex())
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, data: &[u8]) -> Result<BlobKey> {
        let key = BlobKey::new(data);
        let path = self.path(&key);
        if path.exists() {
            return Ok(key);
        }
        // readers must never see a partially written blob
        let tmp = path.with_extension("partial");
        std::fs::write(&tmp, data)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move blob into {}", path.display()))?;
        Ok(key)
    }

    fn contains(&self, key: &BlobKey) -> Result<bool> {
        Ok(self.path(key).exists())
    }

    fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).context("failed to read blob"),
        }
    }
}
