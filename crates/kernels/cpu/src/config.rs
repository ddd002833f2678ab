//! CPU engine configuration.

use serde::{Deserialize, Serialize};

/// Configuration for [`CpuEngine`](crate::CpuEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuEngineConfig {
    /// Compile edge graphs natively. When `false` every edge graph is
    /// declined and the runtime falls back to local sequential execution.
    pub native_edge_graphs: bool,
    /// Minimum number of independent kernels in one level or stage before
    /// they are run in parallel.
    pub parallel_threshold: usize,
    /// Write each compiled closure plan's schedule to
    /// `<cache_dir>/<name>.json`.
    pub persist_manifests: bool,
}

impl Default for CpuEngineConfig {
    fn default() -> Self {
        Self {
            native_edge_graphs: true,
            parallel_threshold: 2,
            persist_manifests: false,
        }
    }
}

impl CpuEngineConfig {
    /// Configuration that declines every edge graph.
    pub fn declining() -> Self {
        Self {
            native_edge_graphs: false,
            ..Self::default()
        }
    }
}
