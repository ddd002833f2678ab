//! Builder for closure-graph plans.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info};

use kgraph_foundation::{BufferType, FieldRef, FunctionRef, KernelRef};

use crate::config::GraphConfig;
use crate::engine::{Callable, ClosureDesc, GraphEngine};
use crate::error::{Error, Result};

use super::closure::{Arg, ArgValue, Closure, ClosureArena, ClosureNode, SlotKey, SlotSource};
use super::placeholder::{Future, Input, InputState};
use super::plan::ClosurePlan;

/// Builds a plan out of closures wired together by futures and inputs.
///
/// A future can only name a closure that already exists, so the graph is
/// acyclic by construction and declaration order is a valid execution order.
pub struct ClosureGraphBuilder<E: GraphEngine> {
    engine: Arc<E>,
    config: GraphConfig,
    arena: ClosureArena<E::ClosureHandle>,
}

impl<E: GraphEngine> std::fmt::Debug for ClosureGraphBuilder<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureGraphBuilder")
            .field("id", &self.arena.id)
            .field("closures", &self.arena.closures.len())
            .field("inputs", &self.arena.inputs.len())
            .finish()
    }
}

impl<E: GraphEngine> ClosureGraphBuilder<E> {
    /// Create an empty builder.
    pub fn new(engine: Arc<E>, config: GraphConfig) -> Self {
        Self {
            engine,
            config,
            arena: ClosureArena::new(),
        }
    }

    /// Declare a new plan input.
    pub fn add_input(&mut self) -> Input {
        let index = self.arena.inputs.len();
        self.arena.inputs.push(InputState::default());
        debug!(input = index, "input added");
        Input {
            builder: self.arena.id,
            index,
        }
    }

    /// Add a kernel closure whose return buffer has type `return_type`.
    pub fn add_kernel(
        &mut self,
        kernel: &KernelRef,
        return_type: BufferType,
        args: impl IntoIterator<Item = Arg>,
    ) -> Result<Closure> {
        self.add_closure(Callable::Kernel(kernel.clone()), Some(return_type), args)
    }

    /// Add a function closure. Functions have no return value and act as
    /// barriers.
    pub fn add_invoke(
        &mut self,
        function: &FunctionRef,
        args: impl IntoIterator<Item = Arg>,
    ) -> Result<Closure> {
        self.add_closure(Callable::Function(function.clone()), None, args)
    }

    fn add_closure(
        &mut self,
        callable: Callable,
        return_type: Option<BufferType>,
        args: impl IntoIterator<Item = Arg>,
    ) -> Result<Closure> {
        let (positional, bindings) = split_args(args)?;

        let args: Vec<SlotSource> = positional
            .into_iter()
            .map(|v| self.arena.source(v))
            .collect::<Result<_>>()?;
        let mut globals: IndexMap<FieldRef, SlotSource> = IndexMap::new();
        for (field, value) in bindings {
            globals.insert(field, self.arena.source(value)?);
        }

        let return_buffer = match &return_type {
            Some(ty) => Some(self.engine.create_buffer(ty)?),
            None => None,
        };

        let desc = ClosureDesc {
            callable: callable.clone(),
            return_buffer: return_buffer.clone(),
            args: args.iter().map(|s| self.arena.slot_desc(s)).collect(),
            globals: globals
                .iter()
                .map(|(f, s)| (f.clone(), self.arena.slot_desc(s)))
                .collect(),
        };
        let handle = self.engine.create_closure(desc)?;

        let index = self.arena.closures.len();
        let keyed = args
            .iter()
            .enumerate()
            .map(|(i, s)| (SlotKey::Arg(i), s))
            .chain(globals.iter().map(|(f, s)| (SlotKey::Global(f.clone()), s)));
        for (key, source) in keyed {
            if let SlotSource::Input(input) = source {
                self.arena.inputs[*input].refs.push((index, key));
            }
        }

        debug!(
            closure = index,
            callable = callable.name(),
            function = callable.is_function(),
            args = args.len(),
            globals = globals.len(),
            "closure added"
        );

        self.arena.closures.push(ClosureNode {
            callable,
            handle,
            return_buffer,
            args,
            globals,
            return_future: None,
            global_futures: IndexMap::new(),
        });
        Ok(Closure {
            builder: self.arena.id,
            index,
        })
    }

    /// Future for a kernel closure's return buffer. Repeated calls return
    /// the same future.
    pub fn return_of(&mut self, closure: Closure) -> Result<Future> {
        let index = self.arena.closure_index(closure)?;
        let builder = self.arena.id;
        let node = &mut self.arena.closures[index];
        if node.callable.is_function() {
            return Err(Error::Structural(format!(
                "function closure {} ({}) has no return value",
                index,
                node.callable.name()
            )));
        }
        Ok(node
            .return_future
            .get_or_insert_with(|| Future {
                builder,
                closure: index,
                field: None,
            })
            .clone())
    }

    /// Future for the value a closure leaves in a global. Repeated calls for
    /// the same global return the same future.
    pub fn global_of(&mut self, closure: Closure, field: &FieldRef) -> Result<Future> {
        let index = self.arena.closure_index(closure)?;
        let builder = self.arena.id;
        let node = &mut self.arena.closures[index];
        Ok(node
            .global_futures
            .entry(field.clone())
            .or_insert_with(|| Future {
                builder,
                closure: index,
                field: Some(field.clone()),
            })
            .clone())
    }

    /// Number of closures added so far.
    pub fn closure_count(&self) -> usize {
        self.arena.closures.len()
    }

    /// Number of inputs declared so far.
    pub fn input_count(&self) -> usize {
        self.arena.inputs.len()
    }

    /// Validate the name, compile the closures and return the plan.
    ///
    /// `outputs` are read back, in order, after every `execute()`.
    pub fn create(self, name: &str, outputs: &[Future]) -> Result<ClosurePlan<E>> {
        validate_name(name, self.config.max_name_len)?;
        if self.arena.closures.is_empty() {
            return Err(Error::EmptyGroup);
        }
        for output in outputs {
            self.arena.check_future(output)?;
        }

        let handles = self.arena.handles();
        let plan = self
            .engine
            .compile_closure_graph(name, &self.config.cache_dir, &handles)
            .map_err(Error::Compilation)?;

        info!(
            plan = name,
            closures = handles.len(),
            inputs = self.arena.inputs.len(),
            outputs = outputs.len(),
            "closure plan created"
        );

        Ok(ClosurePlan::new(
            self.engine,
            name.to_string(),
            self.arena,
            outputs.to_vec(),
            plan,
        ))
    }
}

/// Split trailing arguments into positional values and global bindings.
fn split_args(
    args: impl IntoIterator<Item = Arg>,
) -> Result<(Vec<ArgValue>, Vec<(FieldRef, ArgValue)>)> {
    let mut positional = Vec::new();
    let mut bindings = Vec::new();
    for (position, arg) in args.into_iter().enumerate() {
        match arg {
            Arg::Value(value) if bindings.is_empty() => positional.push(value),
            Arg::Value(_) => return Err(Error::ArgumentShape { position }),
            Arg::Bind(field, value) => bindings.push((field, value)),
        }
    }
    Ok((positional, bindings))
}

/// Plan names are non-empty, bounded, and limited to `[A-Za-z0-9_-]`.
pub(crate) fn validate_name(name: &str, max_len: usize) -> Result<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.chars().count() > max_len {
        "name is too long"
    } else if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        "only ASCII letters, digits, '_' and '-' are allowed"
    } else {
        return Ok(());
    };
    Err(Error::InvalidName {
        name: name.to_string(),
        reason,
    })
}
