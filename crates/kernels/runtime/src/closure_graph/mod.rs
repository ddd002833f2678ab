//! Closure-graph model.
//!
//! Each node is a [`Closure`]: a kernel or invocable function bound to its
//! positional arguments and global bindings. Slots hold literals, plan
//! [`Input`]s, or [`Future`]s produced by earlier closures. Closures live in
//! an index-stable arena; placeholders refer to them by index.
//!
//! Kernel closures may be reordered or run concurrently by the engine as
//! long as the [`ordering`] contract holds. Function closures are full
//! barriers.

mod builder;
mod closure;
pub mod ordering;
mod placeholder;
mod plan;


pub use builder::ClosureGraphBuilder;
pub use closure::{Arg, ArgValue, Closure};
pub use placeholder::{Future, Input};
pub use plan::ClosurePlan;
