//! Nodes and connection lines of the edge graph.

use kgraph_foundation::{Buffer, BufferType, KernelRef, ScriptId};

use crate::engine::{EdgeDesc, LineTarget};

/// All kernels of one script that take part in a group.
///
/// A node is created the first time one of its script's kernels is added.
/// Adjacency is kept as indices into the builder's line list.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) script: ScriptId,
    pub(crate) kernels: Vec<KernelRef>,
    pub(crate) inputs: Vec<usize>,
    pub(crate) outputs: Vec<usize>,
    pub(crate) order: usize,
}

impl Node {
    pub(crate) fn new(script: ScriptId) -> Self {
        Self {
            script,
            kernels: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            order: 0,
        }
    }

    /// Owning script.
    pub fn script(&self) -> ScriptId {
        self.script
    }

    /// Kernels of this script in the group, in the order they were added.
    pub fn kernels(&self) -> &[KernelRef] {
        &self.kernels
    }

    /// Topological order number; every producer has a smaller number.
    pub fn order(&self) -> usize {
        self.order
    }

    pub(crate) fn is_root(&self) -> bool {
        self.inputs.is_empty()
    }

    pub(crate) fn is_isolated(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    pub(crate) fn contains(&self, kernel: &KernelRef) -> bool {
        self.kernels.contains(kernel)
    }
}

/// A directed edge from a kernel output to a kernel input or a global.
///
/// Immutable once created, except for the buffer the fallback binds to it
/// on first use.
#[derive(Debug, Clone)]
pub struct ConnectLine {
    pub(crate) ty: BufferType,
    pub(crate) from: KernelRef,
    pub(crate) to: LineTarget,
    pub(crate) from_node: usize,
    pub(crate) to_node: usize,
    pub(crate) buffer: Option<Buffer>,
}

impl ConnectLine {
    /// Shape of the data crossing this line.
    pub fn buffer_type(&self) -> BufferType {
        self.ty
    }

    /// Producing kernel.
    pub fn from(&self) -> &KernelRef {
        &self.from
    }

    /// Consuming kernel or global.
    pub fn to(&self) -> &LineTarget {
        &self.to
    }

    /// Buffer bound to this line, once materialized.
    pub fn buffer(&self) -> Option<&Buffer> {
        self.buffer.as_ref()
    }

    pub(crate) fn targets_kernel(&self, kernel: &KernelRef) -> bool {
        matches!(&self.to, LineTarget::Kernel(k) if k == kernel)
    }

    pub(crate) fn to_desc(&self) -> EdgeDesc {
        EdgeDesc {
            ty: self.ty,
            from: self.from.clone(),
            to: self.to.clone(),
        }
    }
}
