//! CPU reference engine for kernel graphs.
//!
//! [`CpuEngine`] implements [`kgraph_runtime::GraphEngine`] with kernels and
//! functions supplied as host closures through a [`KernelRegistry`]. It is
//! the engine the integration tests run against, and a template for native
//! backends.
//!
//! - Edge graphs compile to topological levels; each level's kernels run on
//!   the rayon pool when there are enough of them.
//! - Closure plans compile to the stages of the closure ordering contract.
//!   Function closures run alone as barriers.
//! - With [`CpuEngineConfig::native_edge_graphs`] off, every edge graph is
//!   declined, which exercises the runtime's local fallback.
//! - With [`CpuEngineConfig::persist_manifests`] on, each closure plan's
//!   schedule is written as a [`PlanManifest`] into the cache directory.

mod config;
mod engine;
mod manifest;
mod registry;
mod topology;


pub use config::CpuEngineConfig;
pub use engine::{CpuClosure, CpuEngine, LaunchRecord, PlanId};
pub use manifest::{ManifestClosure, ManifestStage, PlanManifest};
pub use registry::{KernelFn, KernelRegistry, LaunchCtx, fill_f32, map_f32, zip_f32};
pub use topology::CycleError;
