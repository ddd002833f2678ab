//! Closures, their argument slots and the arena that owns them.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use kgraph_foundation::{Buffer, FieldRef, Value};

use crate::engine::{Callable, Dependency, SlotDesc};
use crate::error::{Error, Result};

use super::ordering::ClosureShape;
use super::placeholder::{Future, Input, InputState};

static NEXT_BUILDER: AtomicU64 = AtomicU64::new(1);

/// Handle to a closure added to a [`ClosureGraphBuilder`](super::ClosureGraphBuilder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Closure {
    pub(crate) builder: u64,
    pub(crate) index: usize,
}

impl Closure {
    /// Declaration index.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// A value that can fill an argument or global slot.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// A constant stored in the closure.
    Literal(Value),
    /// Bound per execution.
    Input(Input),
    /// Produced by an earlier closure.
    Future(Future),
}

/// One trailing argument of `add_kernel` / `add_invoke`.
///
/// Positional values come first; once a [`Arg::Bind`] appears, every
/// remaining argument must be a binding too.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Positional argument.
    Value(ArgValue),
    /// Global variable binding applied before the call.
    Bind(FieldRef, ArgValue),
}

impl Arg {
    /// Bind `value` to the global `field`.
    pub fn bind(field: &FieldRef, value: impl Into<ArgValue>) -> Self {
        Arg::Bind(field.clone(), value.into())
    }
}

macro_rules! impl_arg_from {
    ($($ty:ty => |$v:ident| $expr:expr),* $(,)?) => {
        $(
            impl From<$ty> for ArgValue {
                fn from($v: $ty) -> Self {
                    $expr
                }
            }

            impl From<$ty> for Arg {
                fn from(v: $ty) -> Self {
                    Arg::Value(ArgValue::from(v))
                }
            }
        )*
    };
}

impl_arg_from! {
    Value => |v| ArgValue::Literal(v),
    bool => |v| ArgValue::Literal(Value::from(v)),
    i32 => |v| ArgValue::Literal(Value::from(v)),
    i64 => |v| ArgValue::Literal(Value::from(v)),
    f32 => |v| ArgValue::Literal(Value::from(v)),
    f64 => |v| ArgValue::Literal(Value::from(v)),
    Buffer => |v| ArgValue::Literal(Value::Buffer(v)),
    Input => |v| ArgValue::Input(v),
    &Input => |v| ArgValue::Input(*v),
    Future => |v| ArgValue::Future(v),
    &Future => |v| ArgValue::Future(v.clone()),
}

/// Where a slot gets its value from.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SlotSource {
    Literal { value: Value, size: Option<usize> },
    Input(usize),
    Future(Future),
}

impl SlotSource {
    pub(crate) fn literal(value: Value) -> Self {
        let size = value.byte_size();
        SlotSource::Literal { value, size }
    }
}

/// Address of a slot within a closure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum SlotKey {
    Arg(usize),
    Global(FieldRef),
}

#[derive(Debug)]
pub(crate) struct ClosureNode<H> {
    pub(crate) callable: Callable,
    pub(crate) handle: H,
    pub(crate) return_buffer: Option<Buffer>,
    pub(crate) args: Vec<SlotSource>,
    pub(crate) globals: IndexMap<FieldRef, SlotSource>,
    pub(crate) return_future: Option<Future>,
    pub(crate) global_futures: IndexMap<FieldRef, Future>,
}

impl<H> ClosureNode<H> {
    fn slots(&self) -> impl Iterator<Item = (SlotKey, &SlotSource)> {
        let args = self
            .args
            .iter()
            .enumerate()
            .map(|(i, s)| (SlotKey::Arg(i), s));
        let globals = self
            .globals
            .iter()
            .map(|(f, s)| (SlotKey::Global(f.clone()), s));
        args.chain(globals)
    }

    /// Producers this closure reads from, deduplicated, ascending.
    pub(crate) fn dependencies(&self) -> Vec<usize> {
        let mut deps: Vec<usize> = self
            .slots()
            .filter_map(|(_, s)| match s {
                SlotSource::Future(f) => Some(f.closure),
                _ => None,
            })
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }

    pub(crate) fn slot(&self, key: &SlotKey) -> Option<&SlotSource> {
        match key {
            SlotKey::Arg(i) => self.args.get(*i),
            SlotKey::Global(f) => self.globals.get(f),
        }
    }

    pub(crate) fn slot_mut(&mut self, key: &SlotKey) -> Option<&mut SlotSource> {
        match key {
            SlotKey::Arg(i) => self.args.get_mut(*i),
            SlotKey::Global(f) => self.globals.get_mut(f),
        }
    }
}

/// Index-stable storage for closures and inputs.
///
/// Placeholders refer to arena entries by index and carry the arena id, so a
/// placeholder from another builder is detected instead of aliasing.
#[derive(Debug)]
pub(crate) struct ClosureArena<H> {
    pub(crate) id: u64,
    pub(crate) closures: Vec<ClosureNode<H>>,
    pub(crate) inputs: Vec<InputState>,
}

impl<H: Clone> ClosureArena<H> {
    pub(crate) fn new() -> Self {
        Self {
            id: NEXT_BUILDER.fetch_add(1, Ordering::Relaxed),
            closures: Vec::new(),
            inputs: Vec::new(),
        }
    }

    pub(crate) fn input_index(&self, input: &Input) -> Result<usize> {
        if input.builder != self.id || input.index >= self.inputs.len() {
            return Err(Error::not_found(format!("input {}", input.index)));
        }
        Ok(input.index)
    }

    pub(crate) fn closure_index(&self, closure: Closure) -> Result<usize> {
        if closure.builder != self.id || closure.index >= self.closures.len() {
            return Err(Error::not_found(format!("closure {}", closure.index)));
        }
        Ok(closure.index)
    }

    pub(crate) fn check_future(&self, future: &Future) -> Result<()> {
        if future.builder != self.id || future.closure >= self.closures.len() {
            return Err(Error::not_found(format!(
                "future of closure {}",
                future.closure
            )));
        }
        Ok(())
    }

    /// Validate a placeholder and turn it into a slot source.
    pub(crate) fn source(&self, value: ArgValue) -> Result<SlotSource> {
        match value {
            ArgValue::Literal(v) => Ok(SlotSource::literal(v)),
            ArgValue::Input(input) => Ok(SlotSource::Input(self.input_index(&input)?)),
            ArgValue::Future(future) => {
                self.check_future(&future)?;
                Ok(SlotSource::Future(future))
            }
        }
    }

    /// Current authoritative value of a slot source.
    pub(crate) fn slot_value(&self, source: &SlotSource) -> Option<Value> {
        match source {
            SlotSource::Literal { value, .. } => Some(value.clone()),
            SlotSource::Input(i) => self.inputs[*i].value.clone(),
            SlotSource::Future(f) => self.local_value(f),
        }
    }

    /// A future's value as known to the runtime, without asking the engine.
    ///
    /// A return future is its producer's return buffer; a global future is
    /// whatever the producer binds to that global.
    pub(crate) fn local_value(&self, future: &Future) -> Option<Value> {
        let producer = &self.closures[future.closure];
        match &future.field {
            None => producer.return_buffer.clone().map(Value::Buffer),
            Some(field) => producer
                .globals
                .get(field)
                .and_then(|s| self.slot_value(s)),
        }
    }

    /// Engine-facing description of a slot.
    pub(crate) fn slot_desc(&self, source: &SlotSource) -> SlotDesc<H> {
        match source {
            SlotSource::Literal { value, size } => SlotDesc {
                value: Some(value.clone()),
                size: *size,
                dependency: None,
            },
            SlotSource::Input(i) => {
                let value = self.inputs[*i].value.clone();
                SlotDesc {
                    size: value.as_ref().and_then(Value::byte_size),
                    value,
                    dependency: None,
                }
            }
            SlotSource::Future(f) => SlotDesc {
                value: self.local_value(f),
                size: None,
                dependency: Some(Dependency {
                    closure: self.closures[f.closure].handle.clone(),
                    field: f.field.clone(),
                }),
            },
        }
    }

    pub(crate) fn shapes(&self) -> Vec<ClosureShape> {
        self.closures
            .iter()
            .map(|c| ClosureShape {
                is_function: c.callable.is_function(),
                deps: c.dependencies(),
            })
            .collect()
    }

    pub(crate) fn handles(&self) -> Vec<H> {
        self.closures.iter().map(|c| c.handle.clone()).collect()
    }
}
