//! Compiled closure plans.

use std::sync::Arc;

use tracing::{info, instrument, trace, warn};

use kgraph_foundation::{FieldRef, Value};

use crate::engine::GraphEngine;
use crate::error::{Error, Result};

use super::closure::{Closure, ClosureArena, SlotKey, SlotSource};
use super::ordering::{self, Stage};
use super::placeholder::{Future, Input};

/// An immutable, compiled closure graph.
///
/// The plan holds the authoritative value of every slot. Binding an input
/// writes through to each slot that references it and to the compiled
/// engine plan; nothing else is cached.
pub struct ClosurePlan<E: GraphEngine> {
    engine: Arc<E>,
    name: String,
    arena: ClosureArena<E::ClosureHandle>,
    outputs: Vec<Future>,
    handle: E::PlanHandle,
}

impl<E: GraphEngine> std::fmt::Debug for ClosurePlan<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosurePlan")
            .field("name", &self.name)
            .field("closures", &self.arena.closures.len())
            .field("inputs", &self.arena.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

impl<E: GraphEngine> ClosurePlan<E> {
    pub(crate) fn new(
        engine: Arc<E>,
        name: String,
        arena: ClosureArena<E::ClosureHandle>,
        outputs: Vec<Future>,
        handle: E::PlanHandle,
    ) -> Self {
        Self {
            engine,
            name,
            arena,
            outputs,
            handle,
        }
    }

    /// Bind `args` to the inputs in declaration order, run the plan and read
    /// back the outputs.
    ///
    /// With fewer arguments than inputs nothing runs: the shortfall is
    /// logged and `Ok(None)` returned. Surplus arguments are ignored.
    pub fn execute(&mut self, args: &[Value]) -> Result<Option<Vec<Value>>> {
        match self.execute_strict(args) {
            Ok(values) => Ok(Some(values)),
            Err(Error::InsufficientInputs { expected, actual }) => {
                warn!(plan = %self.name, expected, actual, "not enough arguments, plan skipped");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`execute`](Self::execute), but a shortfall of arguments is an
    /// [`Error::InsufficientInputs`].
    #[instrument(skip_all, name = "closure_plan", fields(plan = %self.name))]
    pub fn execute_strict(&mut self, args: &[Value]) -> Result<Vec<Value>> {
        let expected = self.arena.inputs.len();
        if args.len() < expected {
            return Err(Error::InsufficientInputs {
                expected,
                actual: args.len(),
            });
        }
        if args.len() > expected {
            info!(
                expected,
                ignored = args.len() - expected,
                "surplus arguments ignored"
            );
        }

        for (index, value) in args.iter().take(expected).enumerate() {
            self.bind_input(index, value.clone())?;
        }

        self.engine.execute_plan(&self.handle)?;

        self.outputs
            .iter()
            .map(|f| self.future_value(f))
            .collect()
    }

    /// Bind a single input without running the plan.
    pub fn set_input(&mut self, input: &Input, value: impl Into<Value>) -> Result<()> {
        let index = self.arena.input_index(input)?;
        self.bind_input(index, value.into())
    }

    fn bind_input(&mut self, index: usize, value: Value) -> Result<()> {
        let state = &mut self.arena.inputs[index];
        state.value = Some(value.clone());
        let size = value.byte_size();
        for (closure, key) in &state.refs {
            let handle = &self.arena.closures[*closure].handle;
            trace!(input = index, closure, ?key, "input slot updated");
            match key {
                SlotKey::Arg(i) => self.engine.set_closure_arg(handle, *i, &value, size)?,
                SlotKey::Global(field) => {
                    self.engine.set_closure_global(handle, field, &value, size)?
                }
            }
        }
        Ok(())
    }

    /// Replace a positional argument with a literal.
    pub fn set_arg(&mut self, closure: Closure, index: usize, value: impl Into<Value>) -> Result<()> {
        self.replace_slot(closure, SlotKey::Arg(index), value.into())
    }

    /// Replace a global binding with a literal.
    pub fn set_global(
        &mut self,
        closure: Closure,
        field: &FieldRef,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.replace_slot(closure, SlotKey::Global(field.clone()), value.into())
    }

    fn replace_slot(&mut self, closure: Closure, key: SlotKey, value: Value) -> Result<()> {
        let index = self.arena.closure_index(closure)?;
        let slot = self.arena.closures[index]
            .slot_mut(&key)
            .ok_or_else(|| Error::not_found(format!("slot {key:?} of closure {index}")))?;

        // A slot fed by an input stops following it.
        if let SlotSource::Input(input) = slot {
            let input = *input;
            self.arena.inputs[input]
                .refs
                .retain(|(c, k)| !(*c == index && *k == key));
        }
        let slot = self.arena.closures[index]
            .slot_mut(&key)
            .ok_or_else(|| Error::not_found(format!("slot {key:?} of closure {index}")))?;
        *slot = SlotSource::literal(value.clone());

        let handle = &self.arena.closures[index].handle;
        let size = value.byte_size();
        match &key {
            SlotKey::Arg(i) => self.engine.set_closure_arg(handle, *i, &value, size)?,
            SlotKey::Global(field) => self.engine.set_closure_global(handle, field, &value, size)?,
        }
        Ok(())
    }

    /// Value last bound to an input, if any.
    pub fn input_value(&self, input: &Input) -> Result<Option<Value>> {
        let index = self.arena.input_index(input)?;
        Ok(self.arena.inputs[index].value.clone())
    }

    /// Read a future's value.
    ///
    /// A return future is the producer's return buffer. A global future is
    /// the value the engine recorded for the producer's own run, if it
    /// records one, otherwise the value the producer binds to it (a literal,
    /// or the bound input). Other closures writing the same global never
    /// change it.
    pub fn future_value(&self, future: &Future) -> Result<Value> {
        self.arena.check_future(future)?;
        let engine_value = future.field.as_ref().and_then(|field| {
            let producer = &self.arena.closures[future.closure].handle;
            self.engine.read_closure_global(producer, field)
        });
        engine_value
            .or_else(|| self.arena.local_value(future))
            .ok_or(Error::UnresolvedFuture {
                closure: future.closure,
            })
    }

    /// Barrier-separated stages of mutually independent closures.
    pub fn stages(&self) -> Vec<Stage> {
        ordering::stages(&self.arena.shapes())
    }

    /// Plan name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output futures in read-back order.
    pub fn outputs(&self) -> &[Future] {
        &self.outputs
    }

    /// Number of declared inputs.
    pub fn input_count(&self) -> usize {
        self.arena.inputs.len()
    }

    /// Number of closures.
    pub fn closure_count(&self) -> usize {
        self.arena.closures.len()
    }
}

impl<E: GraphEngine> Drop for ClosurePlan<E> {
    fn drop(&mut self) {
        self.engine.release_plan(&self.handle);
    }
}
