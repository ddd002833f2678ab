//! The boundary to the native graph engine.
//!
//! The runtime never executes kernels itself on the native path. It hands
//! validated graphs to a [`GraphEngine`], which compiles them into opaque plan
//! handles and runs those handles synchronously. The engine also provides the
//! narrow primitives the local fallback needs: buffer creation, single kernel
//! launches and global bindings.
//!
//! ```text
//! EdgeGraphBuilder ──compile_edge_graph──►┐
//!                                         │   PlanHandle ──execute_plan──► engine workers
//! ClosureGraphBuilder ─create_closure────►│
//!                     ─compile_closure_graph┘
//! ```

use std::fmt;
use std::path::Path;

use thiserror::Error;

use kgraph_foundation::{
    Buffer, BufferError, BufferType, FieldRef, FunctionId, FunctionRef, KernelId, KernelRef, Value,
};

/// Failures reported by a [`GraphEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine rejected the graph.
    #[error("{0}")]
    Compilation(String),

    /// A kernel was launched that the engine has no implementation for.
    #[error("unknown kernel {0}")]
    UnknownKernel(KernelId),

    /// A function was invoked that the engine has no implementation for.
    #[error("unknown function {0}")]
    UnknownFunction(FunctionId),

    /// A closure handle does not belong to this engine.
    #[error("unknown closure {0}")]
    UnknownClosure(String),

    /// A plan handle does not belong to this engine or was released.
    #[error("unknown plan {0}")]
    UnknownPlan(String),

    /// A closure slot had no value when the closure ran.
    #[error("closure {closure} slot {slot} is unbound")]
    UnboundSlot {
        /// Closure being launched.
        closure: String,
        /// Argument index or global name.
        slot: String,
    },

    /// A kernel or function reported a failure.
    #[error("{callable} failed: {message}")]
    Launch {
        /// Kernel or function name.
        callable: String,
        /// Failure reported by the callable.
        message: String,
    },

    /// A buffer copy failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Writing plan artifacts failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Destination of an edge-graph connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LineTarget {
    /// The input of another kernel.
    Kernel(KernelRef),
    /// A global variable of a script.
    Global(FieldRef),
}

impl fmt::Display for LineTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineTarget::Kernel(k) => write!(f, "{k}"),
            LineTarget::Global(g) => write!(f, "{g}"),
        }
    }
}

impl From<KernelRef> for LineTarget {
    fn from(k: KernelRef) -> Self {
        LineTarget::Kernel(k)
    }
}

impl From<&KernelRef> for LineTarget {
    fn from(k: &KernelRef) -> Self {
        LineTarget::Kernel(k.clone())
    }
}

impl From<FieldRef> for LineTarget {
    fn from(f: FieldRef) -> Self {
        LineTarget::Global(f)
    }
}

impl From<&FieldRef> for LineTarget {
    fn from(f: &FieldRef) -> Self {
        LineTarget::Global(f.clone())
    }
}

/// One edge of an edge graph as handed to the engine.
#[derive(Debug, Clone)]
pub struct EdgeDesc {
    /// Shape of the data crossing the edge.
    pub ty: BufferType,
    /// Producing kernel.
    pub from: KernelRef,
    /// Consuming kernel or global.
    pub to: LineTarget,
}

/// A validated edge graph: kernels in execution order plus every edge.
#[derive(Debug, Clone, Default)]
pub struct EdgeGraphDesc {
    /// Kernels, ordered so every producer precedes its consumers.
    pub kernels: Vec<KernelRef>,
    /// All connections.
    pub edges: Vec<EdgeDesc>,
}

/// The callable bound by a closure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Callable {
    /// Element-parallel kernel.
    Kernel(KernelRef),
    /// Single-shot invocable function; acts as a full barrier.
    Function(FunctionRef),
}

impl Callable {
    /// Whether this callable is an invocable function.
    pub fn is_function(&self) -> bool {
        matches!(self, Callable::Function(_))
    }

    /// Declared name.
    pub fn name(&self) -> &str {
        match self {
            Callable::Kernel(k) => k.name(),
            Callable::Function(f) => f.name(),
        }
    }
}

/// A slot's dependency on another closure's output.
#[derive(Debug, Clone)]
pub struct Dependency<C> {
    /// Producing closure.
    pub closure: C,
    /// Global written by the producer, or `None` for its return value.
    pub field: Option<FieldRef>,
}

/// Initial state of one argument or global slot.
#[derive(Debug, Clone)]
pub struct SlotDesc<C> {
    /// Current value; `None` for an input placeholder not yet bound.
    pub value: Option<Value>,
    /// Marshalled byte size; `None` for buffer handles and placeholders.
    pub size: Option<usize>,
    /// Producer this slot reads from, if any.
    pub dependency: Option<Dependency<C>>,
}

/// Everything the engine needs to build one closure.
#[derive(Debug, Clone)]
pub struct ClosureDesc<C> {
    /// Kernel or function being called.
    pub callable: Callable,
    /// Return buffer, allocated for kernel closures.
    pub return_buffer: Option<Buffer>,
    /// Positional arguments.
    pub args: Vec<SlotDesc<C>>,
    /// Global bindings applied before the call.
    pub globals: Vec<(FieldRef, SlotDesc<C>)>,
}

/// A native engine able to compile and run kernel graphs.
///
/// All calls are synchronous. `execute_plan` returns only after every kernel
/// and function in the plan has completed; the engine is free to run
/// independent kernels concurrently in between.
pub trait GraphEngine: Send + Sync {
    /// Opaque compiled plan.
    type PlanHandle: Clone + fmt::Debug + Send + Sync;
    /// Opaque compiled closure.
    type ClosureHandle: Clone + fmt::Debug + Send + Sync;

    /// Compile an edge graph.
    ///
    /// Returns `Ok(None)` when the engine declines the graph (the caller may
    /// fall back to local execution) and `Err` when it rejects it.
    fn compile_edge_graph(
        &self,
        graph: &EdgeGraphDesc,
    ) -> Result<Option<Self::PlanHandle>, EngineError>;

    /// Bind an external input buffer to a kernel of a compiled edge plan.
    fn set_group_input(
        &self,
        plan: &Self::PlanHandle,
        kernel: &KernelRef,
        buffer: &Buffer,
    ) -> Result<(), EngineError>;

    /// Bind an external output buffer to a kernel of a compiled edge plan.
    fn set_group_output(
        &self,
        plan: &Self::PlanHandle,
        kernel: &KernelRef,
        buffer: &Buffer,
    ) -> Result<(), EngineError>;

    /// Build a closure.
    fn create_closure(
        &self,
        desc: ClosureDesc<Self::ClosureHandle>,
    ) -> Result<Self::ClosureHandle, EngineError>;

    /// Replace the value of a positional argument slot. The slot stops
    /// reading from any producer it depended on.
    fn set_closure_arg(
        &self,
        closure: &Self::ClosureHandle,
        index: usize,
        value: &Value,
        size: Option<usize>,
    ) -> Result<(), EngineError>;

    /// Replace the value of a global binding slot, dropping its dependency.
    fn set_closure_global(
        &self,
        closure: &Self::ClosureHandle,
        field: &FieldRef,
        value: &Value,
        size: Option<usize>,
    ) -> Result<(), EngineError>;

    /// Compile closures, in declaration order, into a plan.
    fn compile_closure_graph(
        &self,
        name: &str,
        cache_dir: &Path,
        closures: &[Self::ClosureHandle],
    ) -> Result<Self::PlanHandle, EngineError>;

    /// Run a compiled plan to completion.
    fn execute_plan(&self, plan: &Self::PlanHandle) -> Result<(), EngineError>;

    /// Allocate a buffer.
    fn create_buffer(&self, ty: &BufferType) -> Result<Buffer, EngineError> {
        Ok(Buffer::new(*ty))
    }

    /// Launch one kernel synchronously.
    fn launch_kernel(
        &self,
        kernel: &KernelRef,
        input: Option<&Buffer>,
        output: Option<&Buffer>,
    ) -> Result<(), EngineError>;

    /// Set a script global.
    fn bind_global(&self, field: &FieldRef, value: &Value) -> Result<(), EngineError>;

    /// Current value of a script global, if the engine tracks it.
    fn read_global(&self, _field: &FieldRef) -> Option<Value> {
        None
    }

    /// Value `closure` left in a global the last time it ran, if the engine
    /// tracks it. Other closures binding the same global do not affect it.
    fn read_closure_global(
        &self,
        _closure: &Self::ClosureHandle,
        _field: &FieldRef,
    ) -> Option<Value> {
        None
    }

    /// Release a plan. Called once when its group or plan is dropped.
    fn release_plan(&self, _plan: &Self::PlanHandle) {}
}
