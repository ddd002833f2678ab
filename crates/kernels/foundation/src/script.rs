//! Scripts and the callable handles they own.
//!
//! A [`Script`] is the parent object of kernels, invocable functions and
//! global fields. The handles it hands out ([`KernelRef`], [`FunctionRef`],
//! [`FieldRef`]) are opaque and comparable; equality and hashing go through
//! the handle's identifier only, so two kernels named `"scale"` in different
//! scripts are different kernels.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ids::{FieldId, FunctionId, KernelId, ScriptId};

/// Which buffers a kernel entry point takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelSignature {
    /// Kernel reads an input buffer.
    pub has_input: bool,
    /// Kernel writes an output buffer.
    pub has_output: bool,
}

impl KernelSignature {
    /// Input and output.
    pub const fn in_out() -> Self {
        Self {
            has_input: true,
            has_output: true,
        }
    }

    /// Output only (a generator).
    pub const fn out_only() -> Self {
        Self {
            has_input: false,
            has_output: true,
        }
    }

    /// Input only (a sink).
    pub const fn in_only() -> Self {
        Self {
            has_input: true,
            has_output: false,
        }
    }
}

impl Default for KernelSignature {
    fn default() -> Self {
        Self::in_out()
    }
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $id:ty) => {
        impl $name {
            /// Identifier of this handle.
            pub fn id(&self) -> $id {
                self.id
            }

            /// Identifier of the owning script.
            pub fn script(&self) -> ScriptId {
                self.script
            }

            /// Declared name (for diagnostics only).
            pub fn name(&self) -> &str {
                &self.name
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", self.name, self.id)
            }
        }
    };
}

/// Handle to a kernel entry point.
#[derive(Debug, Clone)]
pub struct KernelRef {
    id: KernelId,
    script: ScriptId,
    name: Arc<str>,
    signature: KernelSignature,
}

impl KernelRef {
    /// Buffers this kernel takes.
    pub fn signature(&self) -> KernelSignature {
        self.signature
    }
}

define_handle!(KernelRef, KernelId);

/// Handle to an invocable (single-shot) function.
#[derive(Debug, Clone)]
pub struct FunctionRef {
    id: FunctionId,
    script: ScriptId,
    name: Arc<str>,
}

define_handle!(FunctionRef, FunctionId);

/// Handle to a script global variable.
#[derive(Debug, Clone)]
pub struct FieldRef {
    id: FieldId,
    script: ScriptId,
    name: Arc<str>,
}

define_handle!(FieldRef, FieldId);

/// A named owner of kernels, functions and globals.
#[derive(Debug, Clone)]
pub struct Script {
    id: ScriptId,
    name: Arc<str>,
    kernels: IndexMap<Arc<str>, KernelRef>,
    functions: IndexMap<Arc<str>, FunctionRef>,
    fields: IndexMap<Arc<str>, FieldRef>,
}

impl Script {
    /// Create an empty script.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            id: ScriptId::next(),
            name: name.into(),
            kernels: IndexMap::new(),
            functions: IndexMap::new(),
            fields: IndexMap::new(),
        }
    }

    /// Identifier of this script.
    pub fn id(&self) -> ScriptId {
        self.id
    }

    /// Declared name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a kernel entry point. Redeclaring a name returns the existing handle.
    pub fn declare_kernel(&mut self, name: &str, signature: KernelSignature) -> KernelRef {
        let script = self.id;
        self.kernels
            .entry(Arc::from(name))
            .or_insert_with_key(|key| KernelRef {
                id: KernelId::next(),
                script,
                name: Arc::clone(key),
                signature,
            })
            .clone()
    }

    /// Declare an invocable function. Redeclaring a name returns the existing handle.
    pub fn declare_function(&mut self, name: &str) -> FunctionRef {
        let script = self.id;
        self.functions
            .entry(Arc::from(name))
            .or_insert_with_key(|key| FunctionRef {
                id: FunctionId::next(),
                script,
                name: Arc::clone(key),
            })
            .clone()
    }

    /// Declare a global variable. Redeclaring a name returns the existing handle.
    pub fn declare_field(&mut self, name: &str) -> FieldRef {
        let script = self.id;
        self.fields
            .entry(Arc::from(name))
            .or_insert_with_key(|key| FieldRef {
                id: FieldId::next(),
                script,
                name: Arc::clone(key),
            })
            .clone()
    }

    /// Look up a kernel by name.
    pub fn kernel(&self, name: &str) -> Option<&KernelRef> {
        self.kernels.get(name)
    }

    /// Look up a function by name.
    pub fn function(&self, name: &str) -> Option<&FunctionRef> {
        self.functions.get(name)
    }

    /// Look up a global by name.
    pub fn field(&self, name: &str) -> Option<&FieldRef> {
        self.fields.get(name)
    }

    /// All kernels in declaration order.
    pub fn kernels(&self) -> impl Iterator<Item = &KernelRef> {
        self.kernels.values()
    }
}
