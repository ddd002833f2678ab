//! Inputs and futures: the two kinds of placeholder a closure slot can hold.

use kgraph_foundation::{FieldRef, Value};

use super::closure::SlotKey;

/// External value bound at `execute()` time.
///
/// An input fans out to every slot it was passed to. Inputs are numbered in
/// declaration order, which is also the order of `execute()` arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Input {
    pub(crate) builder: u64,
    pub(crate) index: usize,
}

impl Input {
    /// Position of this input among the plan's arguments.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// A closure's return value, or a global it writes.
///
/// Obtained from [`ClosureGraphBuilder::return_of`] and
/// [`ClosureGraphBuilder::global_of`]. Passing a future to a later closure
/// makes that closure depend on the producer.
///
/// [`ClosureGraphBuilder::return_of`]: super::ClosureGraphBuilder::return_of
/// [`ClosureGraphBuilder::global_of`]: super::ClosureGraphBuilder::global_of
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Future {
    pub(crate) builder: u64,
    pub(crate) closure: usize,
    pub(crate) field: Option<FieldRef>,
}

impl Future {
    /// Index of the producing closure.
    pub fn closure(&self) -> usize {
        self.closure
    }

    /// The global this future reads, or `None` for the return value.
    pub fn field(&self) -> Option<&FieldRef> {
        self.field.as_ref()
    }

    /// Whether this is the producer's return value.
    pub fn is_return(&self) -> bool {
        self.field.is_none()
    }
}

/// Arena entry behind an [`Input`]: its consuming slots and bound value.
#[derive(Debug, Clone, Default)]
pub(crate) struct InputState {
    pub(crate) refs: Vec<(usize, SlotKey)>,
    pub(crate) value: Option<Value>,
}
