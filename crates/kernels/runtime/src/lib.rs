//! Kernel graph runtime.
//!
//! This crate turns declarations of kernels and their data dependencies into
//! validated, compiled, executable units. It never runs kernels itself on the
//! native path: a [`GraphEngine`] compiles and executes the graphs.
//!
//! # Architecture
//!
//! - [`edge_graph`] - Kernels grouped per script, wired by typed buffer
//!   connections; cycle, connectivity and isolation checks; topological
//!   order; local sequential fallback
//! - [`closure_graph`] - Closures over kernels and invocable functions, wired
//!   by futures and fed by plan inputs; the ordering contract in
//!   [`closure_graph::ordering`]
//! - [`engine`] - The [`GraphEngine`] boundary and the descriptors handed to it
//! - [`context`] - [`GraphContext`], which hands out builders
//! - [`config`] - [`GraphConfig`]
//! - [`error`] - Error types
//!
//! # Lifecycle
//!
//! 1. **Build** - a single owner adds kernels/closures and wires them up;
//!    every misuse is reported by the call that causes it
//! 2. **Create** - the builder validates the whole graph and the engine
//!    compiles it exactly once
//! 3. **Execute** - synchronous; returns when the whole unit has completed
//!
//! # Example
//!
//! ```ignore
//! use kgraph_runtime::{Arg, GraphContext};
//!
//! let ctx = GraphContext::new(engine);
//! let mut builder = ctx.closure_builder();
//! let x = builder.add_input();
//! let scaled = builder.add_kernel(&scale, ty, [Arg::from(x)])?;
//! let out = builder.return_of(scaled)?;
//! let mut plan = builder.create("scale_once", &[out])?;
//! let values = plan.execute(&[input_buffer.into()])?;
//! ```

pub mod closure_graph;
pub mod config;
pub mod context;
pub mod edge_graph;
pub mod engine;
pub mod error;

#[cfg(test)]
mod test_support;

pub use closure_graph::ordering::{ClosureShape, OrderingViolation, Stage};
pub use closure_graph::{
    Arg, ArgValue, Closure, ClosureGraphBuilder, ClosurePlan, Future, Input,
};
pub use config::{DEFAULT_MAX_NAME_LEN, GraphConfig};
pub use context::GraphContext;
pub use edge_graph::{ConnectLine, EdgeGraphBuilder, EdgeGroup, Node};
pub use engine::{
    Callable, ClosureDesc, Dependency, EdgeDesc, EdgeGraphDesc, EngineError, GraphEngine,
    LineTarget, SlotDesc,
};
pub use error::{Error, Result};
