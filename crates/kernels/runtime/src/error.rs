//! Errors for graph construction and execution.
//!
//! # Error Categories
//!
//! - **Builder misuse**: [`Error::Structural`], [`Error::NotFound`], [`Error::ArgumentShape`]
//! - **Graph shape**: [`Error::Cycle`], [`Error::MultipleGraphs`], [`Error::UnconnectedNode`], [`Error::EmptyGroup`]
//! - **Plan creation**: [`Error::InvalidName`], [`Error::Compilation`]
//! - **Execution**: [`Error::InsufficientInputs`], [`Error::UnresolvedFuture`], [`Error::Engine`]
//!
//! # Propagation
//!
//! Every validation error is raised by the builder call that detects it and
//! leaves the builder usable. A failed `create()` consumes the builder.
//! Execution errors other than insufficient inputs are fatal to that
//! `execute()` call; nothing is retried.

use thiserror::Error;

use kgraph_foundation::ScriptId;

use crate::engine::EngineError;

/// Result type alias for graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the graph builders, groups and plans.
#[derive(Debug, Error)]
pub enum Error {
    /// The builder was used out of sequence, e.g. a kernel added after
    /// connections exist.
    #[error("invalid builder state: {0}")]
    Structural(String),

    /// A kernel, script, closure or placeholder was referenced that this
    /// builder or group never registered.
    #[error("{what} not found")]
    NotFound {
        /// Description of the missing object.
        what: String,
    },

    /// A connection would close a cycle. The connection was not retained.
    #[error("connection {from} -> {to} would create a cycle")]
    Cycle {
        /// Source of the rejected connection.
        from: String,
        /// Destination of the rejected connection.
        to: String,
    },

    /// The group's kernels form more than one connected DAG.
    #[error("group contains {count} disconnected graphs; only one is allowed")]
    MultipleGraphs {
        /// Number of distinct DAGs found.
        count: usize,
    },

    /// A script in a multi-script group has no connections at all.
    #[error("script {script} is not connected to the rest of the group")]
    UnconnectedNode {
        /// The isolated script.
        script: ScriptId,
    },

    /// `create()` was called on a builder with nothing in it.
    #[error("cannot create an empty group")]
    EmptyGroup,

    /// A positional argument followed a global binding.
    #[error("argument {position} must be a global binding: positional arguments cannot follow bindings")]
    ArgumentShape {
        /// Zero-based index of the offending argument.
        position: usize,
    },

    /// The plan name failed validation.
    #[error("invalid plan name {name:?}: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Which constraint failed.
        reason: &'static str,
    },

    /// `execute()` received fewer arguments than the plan declares inputs.
    #[error("plan expects {expected} inputs, got {actual}")]
    InsufficientInputs {
        /// Number of declared inputs.
        expected: usize,
        /// Number of arguments supplied.
        actual: usize,
    },

    /// An output future has no value to read back.
    #[error("output future of closure {closure} has no value")]
    UnresolvedFuture {
        /// Index of the producing closure.
        closure: usize,
    },

    /// The engine rejected the graph at `create()`.
    #[error("graph compilation failed: {0}")]
    Compilation(#[source] EngineError),

    /// The engine failed while building or running a plan.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl Error {
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound { what: what.into() }
    }
}
