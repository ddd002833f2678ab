//! Edge-graph model.
//!
//! Kernels are grouped into one [`Node`] per owning script and wired with
//! [`ConnectLine`]s from a kernel output to another kernel's input or to a
//! script global.
//!
//! # Validation
//!
//! - Connections are checked eagerly: a line that would close a cycle is
//!   rejected and rolled back.
//! - At [`EdgeGraphBuilder::create`] the group must be a single connected
//!   DAG with no isolated script (unless it is the only one).
//!
//! # Execution
//!
//! The compiled [`EdgeGroup`] runs natively when the engine accepted the
//! graph. Otherwise it walks nodes in topological order on the calling
//! thread, materializing one intermediate buffer per producing kernel and
//! sharing it across all of that kernel's outgoing lines.

mod builder;
mod dag;
mod group;
mod node;


pub use builder::EdgeGraphBuilder;
pub use group::EdgeGroup;
pub use node::{ConnectLine, Node};
