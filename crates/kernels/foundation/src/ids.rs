//! Unique identifiers for graph objects
//!
//! Scripts, kernels, functions, fields and buffers are identified by typed
//! numeric wrappers. Identifiers are allocated from process-wide counters, so
//! two handles compare equal only when they were minted by the same
//! declaration, never because they share a name.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Allocates a fresh, process-unique identifier.
            pub fn next() -> Self {
                static COUNTER: AtomicU64 = AtomicU64::new(1);
                Self(COUNTER.fetch_add(1, Ordering::Relaxed))
            }

            /// Returns the raw numeric value.
            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a script (the owner of kernels, functions and fields)
    ScriptId,
    "script"
);

define_id!(
    /// Unique identifier for a kernel entry point
    KernelId,
    "kernel"
);

define_id!(
    /// Unique identifier for an invocable function
    FunctionId,
    "fn"
);

define_id!(
    /// Unique identifier for a script global variable
    FieldId,
    "field"
);

define_id!(
    /// Unique identifier for a buffer allocation
    BufferId,
    "buffer"
);
