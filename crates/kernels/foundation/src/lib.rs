//! kgraph Foundation
//!
//! Data-layer primitives shared by the graph runtime and its engines:
//! identifiers, element/buffer type descriptors, shared buffers, literal
//! values, and the script objects that own kernel, function and global
//! handles.

pub mod buffer;
pub mod ids;
pub mod primitives;
pub mod script;
pub mod value;

// Re-export at crate root
pub use buffer::{Buffer, BufferError};
pub use ids::{BufferId, FieldId, FunctionId, KernelId, ScriptId};
pub use primitives::{BufferType, ElementType};
pub use script::{FieldRef, FunctionRef, KernelRef, KernelSignature, Script};
pub use value::Value;
