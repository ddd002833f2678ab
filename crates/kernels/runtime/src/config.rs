//! Graph runtime configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Maximum plan name length accepted by default.
pub const DEFAULT_MAX_NAME_LEN: usize = 100;

/// Configuration shared by every builder a [`GraphContext`](crate::GraphContext) hands out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Directory passed to the engine when compiling closure plans.
    pub cache_dir: PathBuf,
    /// Fall back to local sequential execution when the engine declines an
    /// edge graph. When disabled, a declined graph fails `create()`.
    pub allow_fallback: bool,
    /// Longest accepted plan name.
    pub max_name_len: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("kgraph-cache"),
            allow_fallback: true,
            max_name_len: DEFAULT_MAX_NAME_LEN,
        }
    }
}

impl GraphConfig {
    /// Replace the cache directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Enable or disable the local fallback.
    pub fn with_fallback(mut self, allow: bool) -> Self {
        self.allow_fallback = allow;
        self
    }
}
