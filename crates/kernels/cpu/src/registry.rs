//! Kernel and function implementations the CPU engine dispatches to.
//!
//! The registry maps kernel and function ids to host closures. Each launch
//! hands the closure a [`LaunchCtx`] holding its input and output buffers,
//! its resolved arguments and access to script globals.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use kgraph_foundation::{Buffer, FieldId, FieldRef, FunctionId, FunctionRef, KernelId, KernelRef, Value};

/// Host implementation of a kernel or function.
pub type KernelFn = Arc<dyn Fn(&LaunchCtx<'_>) -> Result<(), String> + Send + Sync>;

/// Script globals shared by every launch on one engine.
#[derive(Debug, Default)]
pub(crate) struct GlobalStore {
    values: RwLock<IndexMap<FieldId, Value>>,
}

impl GlobalStore {
    pub(crate) fn get(&self, field: &FieldRef) -> Option<Value> {
        self.values
            .read()
            .expect("globals lock poisoned")
            .get(&field.id())
            .cloned()
    }

    pub(crate) fn set(&self, field: &FieldRef, value: Value) {
        self.values
            .write()
            .expect("globals lock poisoned")
            .insert(field.id(), value);
    }
}

/// Everything one launch can see.
pub struct LaunchCtx<'a> {
    /// Buffer the kernel reads, for edge-graph launches.
    pub input: Option<&'a Buffer>,
    /// Buffer the kernel writes: its edge output or its closure return buffer.
    pub output: Option<&'a Buffer>,
    /// Positional closure arguments; empty for edge-graph launches.
    pub args: &'a [Value],
    pub(crate) globals: &'a GlobalStore,
}

impl<'a> LaunchCtx<'a> {
    /// Current value of a global.
    pub fn global(&self, field: &FieldRef) -> Option<Value> {
        self.globals.get(field)
    }

    /// Write a global.
    pub fn set_global(&self, field: &FieldRef, value: Value) {
        self.globals.set(field, value);
    }

    /// The buffer to read element data from: the edge input, otherwise the
    /// first buffer argument.
    pub fn source(&self) -> Option<&'a Buffer> {
        self.input
            .or_else(|| self.args.iter().find_map(Value::as_buffer))
    }

    /// Positional argument `index` as `f32`.
    pub fn arg_f32(&self, index: usize) -> Option<f32> {
        self.args.get(index).and_then(Value::as_f32)
    }
}

/// Ids to implementations.
#[derive(Clone, Default)]
pub struct KernelRegistry {
    kernels: IndexMap<KernelId, KernelFn>,
    functions: IndexMap<FunctionId, KernelFn>,
}

impl KernelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kernel implementation, replacing any previous one.
    pub fn register_kernel(
        &mut self,
        kernel: &KernelRef,
        f: impl Fn(&LaunchCtx<'_>) -> Result<(), String> + Send + Sync + 'static,
    ) -> &mut Self {
        self.kernels.insert(kernel.id(), Arc::new(f));
        self
    }

    /// Register a shared kernel implementation.
    pub fn register_kernel_fn(&mut self, kernel: &KernelRef, f: KernelFn) -> &mut Self {
        self.kernels.insert(kernel.id(), f);
        self
    }

    /// Register a function implementation, replacing any previous one.
    pub fn register_function(
        &mut self,
        function: &FunctionRef,
        f: impl Fn(&LaunchCtx<'_>) -> Result<(), String> + Send + Sync + 'static,
    ) -> &mut Self {
        self.functions.insert(function.id(), Arc::new(f));
        self
    }

    pub(crate) fn kernel(&self, id: KernelId) -> Option<&KernelFn> {
        self.kernels.get(&id)
    }

    pub(crate) fn function(&self, id: FunctionId) -> Option<&KernelFn> {
        self.functions.get(&id)
    }

    /// Number of registered kernels and functions.
    pub fn len(&self) -> usize {
        self.kernels.len() + self.functions.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty() && self.functions.is_empty()
    }
}

impl std::fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelRegistry")
            .field("kernels", &self.kernels.keys().collect::<Vec<_>>())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// Element-wise helpers
// ============================================================================

/// Kernel applying `f` to every `f32` of the source buffer into the output.
pub fn map_f32(f: impl Fn(f32) -> f32 + Send + Sync + 'static) -> KernelFn {
    Arc::new(move |ctx: &LaunchCtx<'_>| {
        let source = ctx.source().ok_or("no source buffer")?;
        let output = ctx.output.ok_or("no output buffer")?;
        let mapped: Vec<f32> = source.read_as::<f32>().into_iter().map(&f).collect();
        output.write_from(&mapped).map_err(|e| e.to_string())
    })
}

/// Kernel combining the first two buffer arguments element-wise.
pub fn zip_f32(f: impl Fn(f32, f32) -> f32 + Send + Sync + 'static) -> KernelFn {
    Arc::new(move |ctx: &LaunchCtx<'_>| {
        let mut buffers = ctx.args.iter().filter_map(Value::as_buffer);
        let (Some(a), Some(b)) = (buffers.next(), buffers.next()) else {
            return Err("expected two buffer arguments".into());
        };
        let output = ctx.output.ok_or("no output buffer")?;
        let combined: Vec<f32> = a
            .read_as::<f32>()
            .into_iter()
            .zip(b.read_as::<f32>())
            .map(|(x, y)| f(x, y))
            .collect();
        output.write_from(&combined).map_err(|e| e.to_string())
    })
}

/// Kernel filling its output with a constant.
pub fn fill_f32(value: f32) -> KernelFn {
    Arc::new(move |ctx: &LaunchCtx<'_>| {
        let output = ctx.output.ok_or("no output buffer")?;
        let len = output.buffer_type().element_count();
        output
            .write_from(&vec![value; len])
            .map_err(|e| e.to_string())
    })
}
