//! Compiled edge-graph groups and the local sequential fallback.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{instrument, trace};

use kgraph_foundation::{Buffer, KernelId, KernelRef, ScriptId, Value};

use crate::engine::{GraphEngine, LineTarget};
use crate::error::{Error, Result};

use super::node::{ConnectLine, Node};

/// A plan input or output kernel and the caller's buffer bound to it.
#[derive(Debug, Clone)]
pub(crate) struct ExternalSlot {
    pub(crate) kernel: KernelRef,
    pub(crate) buffer: Option<Buffer>,
}

impl ExternalSlot {
    pub(crate) fn new(kernel: KernelRef) -> Self {
        Self {
            kernel,
            buffer: None,
        }
    }
}

/// An immutable, compiled edge graph.
///
/// Kernels with no incoming kernel connection are the group's *inputs* and
/// kernels with no outgoing connection its *outputs*; the caller binds
/// buffers to them with [`set_input`](Self::set_input) and
/// [`set_output`](Self::set_output). Buffers bound here must stay alive for
/// the `execute()` calls that use them.
pub struct EdgeGroup<E: GraphEngine> {
    engine: Arc<E>,
    nodes: Vec<Node>,
    lines: Vec<ConnectLine>,
    inputs: IndexMap<KernelId, ExternalSlot>,
    outputs: IndexMap<KernelId, ExternalSlot>,
    native: Option<E::PlanHandle>,
}

impl<E: GraphEngine> std::fmt::Debug for EdgeGroup<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeGroup")
            .field("nodes", &self.nodes.len())
            .field("lines", &self.lines.len())
            .field("native", &self.native.is_some())
            .finish()
    }
}

impl<E: GraphEngine> EdgeGroup<E> {
    pub(crate) fn new(
        engine: Arc<E>,
        nodes: Vec<Node>,
        lines: Vec<ConnectLine>,
        inputs: IndexMap<KernelId, ExternalSlot>,
        outputs: IndexMap<KernelId, ExternalSlot>,
        native: Option<E::PlanHandle>,
    ) -> Self {
        Self {
            engine,
            nodes,
            lines,
            inputs,
            outputs,
            native,
        }
    }

    /// Bind the buffer an input kernel reads from.
    pub fn set_input(&mut self, kernel: &KernelRef, buffer: Buffer) -> Result<()> {
        let slot = self
            .inputs
            .get_mut(&kernel.id())
            .ok_or_else(|| Error::not_found(format!("input kernel {kernel}")))?;
        if let Some(plan) = &self.native {
            self.engine.set_group_input(plan, kernel, &buffer)?;
        }
        slot.buffer = Some(buffer);
        Ok(())
    }

    /// Bind the buffer an output kernel writes to.
    pub fn set_output(&mut self, kernel: &KernelRef, buffer: Buffer) -> Result<()> {
        let slot = self
            .outputs
            .get_mut(&kernel.id())
            .ok_or_else(|| Error::not_found(format!("output kernel {kernel}")))?;
        if let Some(plan) = &self.native {
            self.engine.set_group_output(plan, kernel, &buffer)?;
        }
        slot.buffer = Some(buffer);
        Ok(())
    }

    /// Run the whole group to completion.
    #[instrument(skip_all, name = "edge_group", fields(native = self.native.is_some()))]
    pub fn execute(&mut self) -> Result<()> {
        match &self.native {
            Some(plan) => {
                self.engine.execute_plan(plan)?;
                Ok(())
            }
            None => self.execute_local(),
        }
    }

    /// Walk nodes in order, launching each kernel on the calling thread.
    fn execute_local(&mut self) -> Result<()> {
        for n in 0..self.nodes.len() {
            for k in 0..self.nodes[n].kernels.len() {
                let kernel = self.nodes[n].kernels[k].clone();
                let input = self.resolve_input(&kernel);
                let output = self.resolve_output(&kernel)?;

                if let Some(buffer) = &output {
                    for line in self.lines.iter().filter(|l| l.from == kernel) {
                        if let LineTarget::Global(field) = &line.to {
                            self.engine
                                .bind_global(field, &Value::Buffer(buffer.clone()))?;
                        }
                    }
                }

                trace!(
                    %kernel,
                    input = ?input.as_ref().map(Buffer::id),
                    output = ?output.as_ref().map(Buffer::id),
                    "launch"
                );
                self.engine
                    .launch_kernel(&kernel, input.as_ref(), output.as_ref())?;
            }
        }
        Ok(())
    }

    fn resolve_input(&self, kernel: &KernelRef) -> Option<Buffer> {
        if let Some(slot) = self.inputs.get(&kernel.id()) {
            return slot.buffer.clone();
        }
        self.lines
            .iter()
            .find(|l| l.targets_kernel(kernel))
            .and_then(|l| l.buffer.clone())
    }

    /// The caller's output buffer, or the producer's shared intermediate,
    /// allocated the first time any of its lines is visited.
    fn resolve_output(&mut self, kernel: &KernelRef) -> Result<Option<Buffer>> {
        if let Some(slot) = self.outputs.get(&kernel.id()) {
            return Ok(slot.buffer.clone());
        }

        let Some(first) = self.lines.iter().position(|l| &l.from == kernel) else {
            return Ok(None);
        };
        if let Some(buffer) = &self.lines[first].buffer {
            return Ok(Some(buffer.clone()));
        }

        let buffer = self.engine.create_buffer(&self.lines[first].ty)?;
        for line in self.lines.iter_mut().filter(|l| &l.from == kernel) {
            line.buffer = Some(buffer.clone());
        }
        trace!(%kernel, buffer = %buffer.id(), "intermediate materialized");
        Ok(Some(buffer))
    }

    /// Whether the engine compiled this group natively.
    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }

    /// Scripts in execution order with their order numbers.
    pub fn order(&self) -> Vec<(ScriptId, usize)> {
        self.nodes.iter().map(|n| (n.script, n.order)).collect()
    }

    /// Order number of a script's node.
    pub fn node_order(&self, script: ScriptId) -> Option<usize> {
        self.nodes
            .iter()
            .find(|n| n.script == script)
            .map(|n| n.order)
    }

    /// Nodes in execution order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Connection lines.
    pub fn lines(&self) -> &[ConnectLine] {
        &self.lines
    }

    /// Input kernels.
    pub fn inputs(&self) -> impl Iterator<Item = &KernelRef> {
        self.inputs.values().map(|s| &s.kernel)
    }

    /// Output kernels.
    pub fn outputs(&self) -> impl Iterator<Item = &KernelRef> {
        self.outputs.values().map(|s| &s.kernel)
    }
}

impl<E: GraphEngine> Drop for EdgeGroup<E> {
    fn drop(&mut self) {
        if let Some(plan) = self.native.take() {
            self.engine.release_plan(&plan);
        }
    }
}
