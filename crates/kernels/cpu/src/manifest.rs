//! JSON manifests of compiled closure plans.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use kgraph_runtime::Stage;

/// Schedule of one compiled closure plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanManifest {
    /// Plan name.
    pub name: String,
    /// Closures in declaration order.
    pub closures: Vec<ManifestClosure>,
    /// Stages in execution order.
    pub stages: Vec<ManifestStage>,
}

/// One closure of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestClosure {
    /// Kernel or function name.
    pub callable: String,
    /// Whether the closure is a function barrier.
    pub function: bool,
    /// Positions of the closures it reads from.
    pub deps: Vec<usize>,
}

/// One stage of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestStage {
    /// Closure positions.
    pub closures: Vec<usize>,
    /// Whether the stage is a function barrier.
    pub barrier: bool,
}

impl From<&Stage> for ManifestStage {
    fn from(stage: &Stage) -> Self {
        Self {
            closures: stage.closures.clone(),
            barrier: stage.barrier,
        }
    }
}

impl PlanManifest {
    /// Where the manifest of plan `name` lives under `dir`.
    pub fn path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.json"))
    }

    /// Write the manifest under `dir`, creating the directory if needed.
    pub fn write(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = Self::path(dir, &self.name);
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    /// Read a manifest back.
    pub fn read(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(io::Error::other)
    }
}
