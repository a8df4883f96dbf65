//! Database options

use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default for [`Options::max_rev_tree_depth`].
pub const DEFAULT_MAX_REV_TREE_DEPTH: u32 = 20;

/// Default limit of a changes feed page.
pub const DEFAULT_CHANGES_LIMIT: usize = 1000;

/// Options of a [`Database`](crate::Database).
///
/// Options are usually loaded from a TOML file with [`Self::load`]; missing
/// keys take their default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Number of generations of non-leaf history kept per document.
    pub max_rev_tree_depth: u32,
    /// Prune the touched document after every insert.
    pub prune_on_insert: bool,
    /// Maximum number of rows returned by one changes feed call.
    pub changes_limit: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_rev_tree_depth: DEFAULT_MAX_REV_TREE_DEPTH,
            prune_on_insert: true,
            changes_limit: DEFAULT_CHANGES_LIMIT,
        }
    }
}

impl Options {
    /// Load the options from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Options> {
        let s = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read {}", path.as_ref().to_string_lossy()))?;
        Self::from_toml(&s)
    }

    /// Parse the options from a TOML string.
    pub fn from_toml(s: &str) -> Result<Options> {
        let options: Options = toml::from_str(s)?;
        anyhow::ensure!(
            options.max_rev_tree_depth > 0,
            "max_rev_tree_depth must be at least 1"
        );
        Ok(options)
    }

    /// Get the data directory.
    pub fn data_dir() -> Result<PathBuf> {
        let dir = if let Some(val) = env::var_os("REVTREE_DATA_DIR") {
            PathBuf::from(val)
        } else {
            let path = dirs_next::data_dir().ok_or_else(|| {
                anyhow!("operating environment provides no directory for application data")
            })?;
            path.join("revtree")
        };
        Ok(dir)
    }
}
