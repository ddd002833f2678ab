//! Builder for edge-graph groups.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info};

use kgraph_foundation::{BufferType, KernelRef, ScriptId};

use crate::config::GraphConfig;
use crate::engine::{EdgeGraphDesc, EngineError, GraphEngine, LineTarget};
use crate::error::{Error, Result};

use super::dag::{calc_order, closes_cycle, validate_dag};
use super::group::{EdgeGroup, ExternalSlot};
use super::node::{ConnectLine, Node};

/// Collects kernels and connections, then validates and compiles them into
/// an [`EdgeGroup`].
///
/// All kernels must be added before the first connection. Connections are
/// checked for cycles as they are added; the single-DAG and isolation rules
/// are checked by [`create`](Self::create).
pub struct EdgeGraphBuilder<E: GraphEngine> {
    engine: Arc<E>,
    config: GraphConfig,
    nodes: Vec<Node>,
    script_index: IndexMap<ScriptId, usize>,
    lines: Vec<ConnectLine>,
}

impl<E: GraphEngine> std::fmt::Debug for EdgeGraphBuilder<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeGraphBuilder")
            .field("nodes", &self.nodes.len())
            .field("lines", &self.lines.len())
            .finish()
    }
}

impl<E: GraphEngine> EdgeGraphBuilder<E> {
    /// Create an empty builder.
    pub fn new(engine: Arc<E>, config: GraphConfig) -> Self {
        Self {
            engine,
            config,
            nodes: Vec::new(),
            script_index: IndexMap::new(),
            lines: Vec::new(),
        }
    }

    /// Register a kernel under its script's node.
    ///
    /// Adding the same kernel twice is a no-op. Fails once any connection
    /// has been added.
    pub fn add_kernel(&mut self, kernel: &KernelRef) -> Result<&mut Self> {
        if !self.lines.is_empty() {
            return Err(Error::Structural(
                "kernels must all be added before connections".into(),
            ));
        }

        let idx = match self.script_index.get(&kernel.script()) {
            Some(&idx) => idx,
            None => {
                let idx = self.nodes.len();
                self.nodes.push(Node::new(kernel.script()));
                self.script_index.insert(kernel.script(), idx);
                idx
            }
        };

        let node = &mut self.nodes[idx];
        if !node.contains(kernel) {
            node.kernels.push(kernel.clone());
            debug!(%kernel, script = %kernel.script(), "kernel added");
        }
        Ok(self)
    }

    /// Connect a kernel output to a kernel input or to a script global.
    ///
    /// The line is rejected, and the builder left exactly as it was, if it
    /// would close a cycle.
    pub fn add_connection(
        &mut self,
        ty: BufferType,
        from: &KernelRef,
        to: impl Into<LineTarget>,
    ) -> Result<&mut Self> {
        let to = to.into();

        let from_node = self
            .kernel_node(from)
            .ok_or_else(|| Error::not_found(format!("source kernel {from}")))?;
        let to_node = match &to {
            LineTarget::Kernel(k) => self
                .kernel_node(k)
                .ok_or_else(|| Error::not_found(format!("destination kernel {k}")))?,
            LineTarget::Global(field) => self
                .script_index
                .get(&field.script())
                .copied()
                .ok_or_else(|| {
                    Error::not_found(format!("script {} owning {field}", field.script()))
                })?,
        };

        let line = self.lines.len();
        self.lines.push(ConnectLine {
            ty,
            from: from.clone(),
            to: to.clone(),
            from_node,
            to_node,
            buffer: None,
        });
        self.nodes[from_node].outputs.push(line);
        self.nodes[to_node].inputs.push(line);

        if closes_cycle(&self.nodes, &self.lines, from_node) {
            self.nodes[to_node].inputs.pop();
            self.nodes[from_node].outputs.pop();
            self.lines.pop();
            return Err(Error::Cycle {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        debug!(%from, %to, %ty, "connection added");
        Ok(self)
    }

    /// Number of script nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of connection lines.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Validate, order and compile the group.
    pub fn create(mut self) -> Result<EdgeGroup<E>> {
        validate_dag(&self.nodes, &self.lines)?;
        let order = calc_order(&mut self.nodes, &self.lines)?;

        // Re-seat nodes in execution order and remap line endpoints.
        let mut new_index = vec![0; order.len()];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new;
        }
        let mut slots: Vec<Option<Node>> = self.nodes.into_iter().map(Some).collect();
        let nodes: Vec<Node> = order
            .iter()
            .filter_map(|&old| slots[old].take())
            .collect();
        let mut lines = self.lines;
        for line in &mut lines {
            line.from_node = new_index[line.from_node];
            line.to_node = new_index[line.to_node];
        }

        let kernels: Vec<KernelRef> = nodes
            .iter()
            .flat_map(|n| n.kernels.iter().cloned())
            .collect();

        let inputs: IndexMap<_, _> = kernels
            .iter()
            .filter(|k| k.signature().has_input && !lines.iter().any(|l| l.targets_kernel(k)))
            .map(|k| (k.id(), ExternalSlot::new(k.clone())))
            .collect();
        let outputs: IndexMap<_, _> = kernels
            .iter()
            .filter(|k| k.signature().has_output && !lines.iter().any(|l| &l.from == *k))
            .map(|k| (k.id(), ExternalSlot::new(k.clone())))
            .collect();

        let desc = EdgeGraphDesc {
            kernels,
            edges: lines.iter().map(ConnectLine::to_desc).collect(),
        };

        let native = match self.engine.compile_edge_graph(&desc) {
            Ok(Some(handle)) => Some(handle),
            Ok(None) if self.config.allow_fallback => {
                info!("engine declined edge graph, using local sequential execution");
                None
            }
            Ok(None) => {
                return Err(Error::Compilation(EngineError::Compilation(
                    "engine declined the graph and local fallback is disabled".into(),
                )));
            }
            Err(e) => return Err(Error::Compilation(e)),
        };

        info!(
            nodes = nodes.len(),
            lines = lines.len(),
            inputs = inputs.len(),
            outputs = outputs.len(),
            native = native.is_some(),
            "edge group created"
        );

        Ok(EdgeGroup::new(
            self.engine,
            nodes,
            lines,
            inputs,
            outputs,
            native,
        ))
    }

    fn kernel_node(&self, kernel: &KernelRef) -> Option<usize> {
        self.script_index
            .get(&kernel.script())
            .copied()
            .filter(|&idx| self.nodes[idx].contains(kernel))
    }
}
