//! Integration test harness for kernel graphs.
//!
//! This crate provides a small set of scripts, their CPU implementations and
//! a [`TestHarness`] wiring them to a [`GraphContext`], for end-to-end tests
//! of the full pipeline: Declare → Build → Create → Execute → Verify.

use std::sync::{Arc, Once};

use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

use kgraph_cpu::{CpuEngine, CpuEngineConfig, KernelRegistry, LaunchCtx, map_f32, zip_f32};
use kgraph_foundation::{
    Buffer, BufferType, ElementType, FieldRef, FunctionRef, KernelRef, KernelSignature, Script,
    Value,
};
use kgraph_runtime::{GraphConfig, GraphContext};

static LOGGING: Once = Once::new();

/// Install a test-friendly subscriber once per process.
///
/// Use `RUST_LOG` to override the default filter.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,kgraph_runtime=debug,kgraph_cpu=debug"));
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_test_writer()
            .try_init();
    });
}

/// Element count of every test buffer.
pub const LEN: usize = 4;

/// The buffer type every test kernel reads and writes.
pub fn f32_type() -> BufferType {
    BufferType::new_1d(ElementType::F32, LEN)
}

/// A test buffer holding `values`.
///
/// # Panics
///
/// Panics if `values` does not have [`LEN`] elements.
pub fn f32_buffer(values: [f32; LEN]) -> Buffer {
    Buffer::from_slice(f32_type(), &values).expect("buffer size matches")
}

/// Read a buffer value as `f32`s.
///
/// # Panics
///
/// Panics if `value` is not a buffer.
pub fn read_f32(value: &Value) -> Vec<f32> {
    value.as_buffer().expect("buffer value").read_as::<f32>()
}

/// Kernels, functions and globals declared for the tests, one script each
/// unless noted.
#[derive(Debug, Clone)]
pub struct TestScripts {
    /// Writes `0, 1, 2, ...`; output only.
    pub iota: KernelRef,
    /// `x * 2`.
    pub double: KernelRef,
    /// `x + 1`.
    pub increment: KernelRef,
    /// `-x`.
    pub negate: KernelRef,
    /// `a + b` over two buffer arguments.
    pub add: KernelRef,
    /// `x * factor`, where `factor` is a global of the same script.
    pub scale: KernelRef,
    /// Global read by `scale`.
    pub factor: FieldRef,
    /// Global holding a whole buffer, read by `scale_table`.
    pub table: FieldRef,
    /// Copies the `table` global of its script into its output.
    pub scale_table: KernelRef,
    /// A no-op function; acts as a barrier in closure plans.
    pub checkpoint: FunctionRef,
    /// Two kernels sharing one script: `x * 2` and `x + 1`.
    pub twin_double: KernelRef,
    /// See `twin_double`.
    pub twin_increment: KernelRef,
}

impl TestScripts {
    fn declare() -> Self {
        let mut iota = Script::new("iota");
        let mut double = Script::new("double");
        let mut increment = Script::new("increment");
        let mut negate = Script::new("negate");
        let mut add = Script::new("add");
        let mut scale = Script::new("scale");
        let mut tables = Script::new("tables");
        let mut host = Script::new("host");
        let mut twin = Script::new("twin");

        Self {
            iota: iota.declare_kernel("iota", KernelSignature::out_only()),
            double: double.declare_kernel("double", KernelSignature::in_out()),
            increment: increment.declare_kernel("increment", KernelSignature::in_out()),
            negate: negate.declare_kernel("negate", KernelSignature::in_out()),
            add: add.declare_kernel("add", KernelSignature::in_out()),
            scale: scale.declare_kernel("scale", KernelSignature::in_out()),
            factor: scale.declare_field("factor"),
            table: tables.declare_field("table"),
            scale_table: tables.declare_kernel("copy_table", KernelSignature::out_only()),
            checkpoint: host.declare_function("checkpoint"),
            twin_double: twin.declare_kernel("double", KernelSignature::in_out()),
            twin_increment: twin.declare_kernel("increment", KernelSignature::in_out()),
        }
    }

    fn register(&self, registry: &mut KernelRegistry) {
        let factor = self.factor.clone();
        let table = self.table.clone();
        registry
            .register_kernel(&self.iota, |ctx| {
                let output = ctx.output.ok_or("no output buffer")?;
                let len = output.buffer_type().element_count();
                let values: Vec<f32> = (0..len).map(|i| i as f32).collect();
                output.write_from(&values).map_err(|e| e.to_string())
            })
            .register_kernel_fn(&self.double, map_f32(|x| x * 2.0))
            .register_kernel_fn(&self.increment, map_f32(|x| x + 1.0))
            .register_kernel_fn(&self.negate, map_f32(|x| -x))
            .register_kernel_fn(&self.add, zip_f32(|a, b| a + b))
            .register_kernel(&self.scale, move |ctx: &LaunchCtx<'_>| {
                let factor = ctx
                    .global(&factor)
                    .and_then(|v| v.as_f32())
                    .ok_or("factor is not set")?;
                let source = ctx.source().ok_or("no source buffer")?;
                let output = ctx.output.ok_or("no output buffer")?;
                let scaled: Vec<f32> = source.read_as::<f32>().iter().map(|x| x * factor).collect();
                output.write_from(&scaled).map_err(|e| e.to_string())
            })
            .register_kernel(&self.scale_table, move |ctx: &LaunchCtx<'_>| {
                let value = ctx.global(&table).ok_or("table is not set")?;
                let data = value.as_buffer().ok_or("table is not a buffer")?;
                let output = ctx.output.ok_or("no output buffer")?;
                output
                    .write_from(&data.read_as::<f32>())
                    .map_err(|e| e.to_string())
            })
            .register_kernel_fn(&self.twin_double, map_f32(|x| x * 2.0))
            .register_kernel_fn(&self.twin_increment, map_f32(|x| x + 1.0))
            .register_function(&self.checkpoint, |_| Ok(()));
    }
}

/// Test harness wiring the test scripts to a CPU engine.
pub struct TestHarness {
    /// Declared kernels, functions and globals.
    pub scripts: TestScripts,
    ctx: GraphContext<CpuEngine>,
}

impl TestHarness {
    /// Harness with the default engine and graph configuration.
    pub fn new() -> Self {
        Self::with_config(CpuEngineConfig::default(), GraphConfig::default())
    }

    /// Harness whose engine declines every edge graph, forcing the local
    /// sequential fallback.
    pub fn fallback() -> Self {
        Self::with_config(CpuEngineConfig::declining(), GraphConfig::default())
    }

    /// Harness with explicit configurations.
    pub fn with_config(engine: CpuEngineConfig, graph: GraphConfig) -> Self {
        init_logging();
        debug!(
            native = engine.native_edge_graphs,
            fallback = graph.allow_fallback,
            "test harness created"
        );
        let scripts = TestScripts::declare();
        let mut registry = KernelRegistry::new();
        scripts.register(&mut registry);
        let ctx = GraphContext::with_config(CpuEngine::new(registry, engine), graph);
        Self { scripts, ctx }
    }

    /// The graph context.
    pub fn ctx(&self) -> &GraphContext<CpuEngine> {
        &self.ctx
    }

    /// The engine.
    pub fn engine(&self) -> &Arc<CpuEngine> {
        self.ctx.engine()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
