//! The CPU implementation of [`GraphEngine`].
//!
//! Edge graphs compile into topological levels of kernels; closure graphs
//! compile into the barrier-separated stages of the closure ordering
//! contract. Independent kernels in one level or stage run on the rayon pool
//! once there are at least `parallel_threshold` of them.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{debug, info, instrument, trace};

use kgraph_foundation::{Buffer, FieldId, FieldRef, KernelId, KernelRef, Value};
use kgraph_runtime::closure_graph::ordering::{self, ClosureShape};
use kgraph_runtime::{
    Callable, ClosureDesc, EdgeDesc, EdgeGraphDesc, EngineError, GraphEngine, LineTarget,
    SlotDesc, Stage,
};

use crate::config::CpuEngineConfig;
use crate::manifest::{ManifestClosure, ManifestStage, PlanManifest};
use crate::registry::{GlobalStore, KernelFn, KernelRegistry, LaunchCtx};
use crate::topology::topological_levels;

/// Handle to a plan compiled by a [`CpuEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlanId(u64);

/// Handle to a closure created by a [`CpuEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuClosure(usize);

/// One completed kernel or function call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    /// Kernel or function name.
    pub callable: String,
    /// Whether a function was called.
    pub function: bool,
}

#[derive(Debug)]
struct EdgePlan {
    kernels: Vec<KernelRef>,
    levels: Vec<Vec<usize>>,
    edges: Vec<EdgeDesc>,
    intermediates: IndexMap<KernelId, Buffer>,
    inputs: IndexMap<KernelId, Buffer>,
    outputs: IndexMap<KernelId, Buffer>,
}

#[derive(Debug)]
struct ClosurePlanState {
    name: String,
    closures: Vec<CpuClosure>,
    stages: Vec<Stage>,
}

#[derive(Debug)]
enum CompiledPlan {
    Edge(EdgePlan),
    Closure(ClosurePlanState),
}

/// Reference engine running kernels as host closures.
pub struct CpuEngine {
    config: CpuEngineConfig,
    registry: KernelRegistry,
    globals: GlobalStore,
    closures: RwLock<Vec<ClosureDesc<CpuClosure>>>,
    /// Global values as each closure left them after its last run.
    closure_globals: RwLock<HashMap<(CpuClosure, FieldId), Value>>,
    plans: RwLock<IndexMap<PlanId, CompiledPlan>>,
    next_plan: AtomicU64,
    launches: Mutex<Vec<LaunchRecord>>,
}

impl std::fmt::Debug for CpuEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuEngine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl CpuEngine {
    /// Create an engine dispatching to `registry`.
    pub fn new(registry: KernelRegistry, config: CpuEngineConfig) -> Self {
        Self {
            config,
            registry,
            globals: GlobalStore::default(),
            closures: RwLock::new(Vec::new()),
            closure_globals: RwLock::new(HashMap::new()),
            plans: RwLock::new(IndexMap::new()),
            next_plan: AtomicU64::new(1),
            launches: Mutex::new(Vec::new()),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &CpuEngineConfig {
        &self.config
    }

    /// Every call made so far, in completion order.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().expect("launch log poisoned").clone()
    }

    /// Forget recorded launches.
    pub fn clear_launches(&self) {
        self.launches.lock().expect("launch log poisoned").clear();
    }

    /// Number of live compiled plans.
    pub fn plan_count(&self) -> usize {
        self.plans.read().expect("plans lock poisoned").len()
    }

    /// Stages of a compiled closure plan.
    pub fn closure_stages(&self, plan: &PlanId) -> Option<Vec<Stage>> {
        match self.plans.read().expect("plans lock poisoned").get(plan)? {
            CompiledPlan::Closure(state) => Some(state.stages.clone()),
            CompiledPlan::Edge(_) => None,
        }
    }

    /// Levels of a compiled edge plan, as kernel lists.
    pub fn edge_levels(&self, plan: &PlanId) -> Option<Vec<Vec<KernelRef>>> {
        match self.plans.read().expect("plans lock poisoned").get(plan)? {
            CompiledPlan::Edge(edge) => Some(
                edge.levels
                    .iter()
                    .map(|level| level.iter().map(|&k| edge.kernels[k].clone()).collect())
                    .collect(),
            ),
            CompiledPlan::Closure(_) => None,
        }
    }

    fn kernel_fn(&self, kernel: &KernelRef) -> Result<&KernelFn, EngineError> {
        self.registry
            .kernel(kernel.id())
            .ok_or(EngineError::UnknownKernel(kernel.id()))
    }

    fn callable_fn(&self, callable: &Callable) -> Result<&KernelFn, EngineError> {
        match callable {
            Callable::Kernel(k) => self.kernel_fn(k),
            Callable::Function(f) => self
                .registry
                .function(f.id())
                .ok_or(EngineError::UnknownFunction(f.id())),
        }
    }

    fn launch(
        &self,
        callable: &Callable,
        input: Option<&Buffer>,
        output: Option<&Buffer>,
        args: &[Value],
    ) -> Result<(), EngineError> {
        let f = self.callable_fn(callable)?;
        let ctx = LaunchCtx {
            input,
            output,
            args,
            globals: &self.globals,
        };
        trace!(callable = callable.name(), args = args.len(), "launch");
        f(&ctx).map_err(|message| EngineError::Launch {
            callable: callable.name().to_string(),
            message,
        })?;
        self.launches
            .lock()
            .expect("launch log poisoned")
            .push(LaunchRecord {
                callable: callable.name().to_string(),
                function: callable.is_function(),
            });
        Ok(())
    }

    /// Run `count` independent jobs, in parallel past the threshold.
    fn run_batch(
        &self,
        count: usize,
        parallel: bool,
        job: impl Fn(usize) -> Result<(), EngineError> + Send + Sync,
    ) -> Result<(), EngineError> {
        if parallel && count >= self.config.parallel_threshold {
            (0..count).into_par_iter().try_for_each(job)
        } else {
            (0..count).try_for_each(job)
        }
    }

    // ========================================================================
    // Edge plans
    // ========================================================================

    fn execute_edge(&self, plan: &EdgePlan) -> Result<(), EngineError> {
        for level in &plan.levels {
            for &k in level {
                let kernel = &plan.kernels[k];
                for edge in plan.edges.iter().filter(|e| &e.from == kernel) {
                    if let LineTarget::Global(field) = &edge.to
                        && let Some(buffer) = plan.intermediates.get(&kernel.id())
                    {
                        self.globals.set(field, Value::Buffer(buffer.clone()));
                    }
                }
            }

            self.run_batch(level.len(), true, |i| {
                let kernel = &plan.kernels[level[i]];
                let input = plan.inputs.get(&kernel.id()).or_else(|| {
                    plan.edges
                        .iter()
                        .find(|e| matches!(&e.to, LineTarget::Kernel(to) if to == kernel))
                        .and_then(|e| plan.intermediates.get(&e.from.id()))
                });
                let output = plan
                    .outputs
                    .get(&kernel.id())
                    .or_else(|| plan.intermediates.get(&kernel.id()));
                self.launch(&Callable::Kernel(kernel.clone()), input, output, &[])
            })?;
        }
        Ok(())
    }

    fn bind_edge_buffer(
        &self,
        plan: &PlanId,
        kernel: &KernelRef,
        buffer: &Buffer,
        output: bool,
    ) -> Result<(), EngineError> {
        let mut plans = self.plans.write().expect("plans lock poisoned");
        let Some(CompiledPlan::Edge(edge)) = plans.get_mut(plan) else {
            return Err(EngineError::UnknownPlan(format!("{plan:?}")));
        };
        if !edge.kernels.contains(kernel) {
            return Err(EngineError::UnknownKernel(kernel.id()));
        }
        let map = if output {
            &mut edge.outputs
        } else {
            &mut edge.inputs
        };
        map.insert(kernel.id(), buffer.clone());
        Ok(())
    }

    // ========================================================================
    // Closure plans
    // ========================================================================

    fn execute_closures(&self, state: &ClosurePlanState) -> Result<(), EngineError> {
        for stage in &state.stages {
            let closures = self.closures.read().expect("closures lock poisoned");
            // Global bindings go through one shared store, so a stage that
            // binds globals runs in declaration order.
            let binds_globals = stage
                .closures
                .iter()
                .any(|&i| !closures[state.closures[i].0].globals.is_empty());
            let parallel = !stage.barrier && !binds_globals;
            drop(closures);

            self.run_batch(stage.closures.len(), parallel, |i| {
                self.run_closure(state.closures[stage.closures[i]])
            })?;
        }
        Ok(())
    }

    fn run_closure(&self, handle: CpuClosure) -> Result<(), EngineError> {
        let desc = self
            .closures
            .read()
            .expect("closures lock poisoned")
            .get(handle.0)
            .cloned()
            .ok_or_else(|| EngineError::UnknownClosure(format!("{handle:?}")))?;

        let args = desc
            .args
            .iter()
            .enumerate()
            .map(|(i, slot)| self.resolve_slot(handle, &i.to_string(), slot))
            .collect::<Result<Vec<_>, _>>()?;
        for (field, slot) in &desc.globals {
            let value = self.resolve_slot(handle, field.name(), slot)?;
            self.globals.set(field, value);
        }

        self.launch(&desc.callable, None, desc.return_buffer.as_ref(), &args)?;

        // Stages that bind globals run one closure at a time, so the shared
        // store still holds this closure's values.
        let mut record = self
            .closure_globals
            .write()
            .expect("closure globals lock poisoned");
        for (field, _) in &desc.globals {
            if let Some(value) = self.globals.get(field) {
                record.insert((handle, field.id()), value);
            }
        }
        Ok(())
    }

    /// A slot's value at launch time: the producer's output for dependent
    /// slots, otherwise the stored value. A global dependency reads what
    /// the producer itself left in the global, not the shared store.
    fn resolve_slot(
        &self,
        closure: CpuClosure,
        slot_name: &str,
        slot: &SlotDesc<CpuClosure>,
    ) -> Result<Value, EngineError> {
        if let Some(dep) = &slot.dependency {
            let produced = match &dep.field {
                None => self
                    .closures
                    .read()
                    .expect("closures lock poisoned")
                    .get(dep.closure.0)
                    .and_then(|c| c.return_buffer.clone())
                    .map(Value::Buffer),
                Some(field) => self.closure_global(dep.closure, field),
            };
            if let Some(value) = produced {
                return Ok(value);
            }
        }
        slot.value.clone().ok_or_else(|| EngineError::UnboundSlot {
            closure: format!("{closure:?}"),
            slot: slot_name.to_string(),
        })
    }

    fn closure_global(&self, closure: CpuClosure, field: &FieldRef) -> Option<Value> {
        self.closure_globals
            .read()
            .expect("closure globals lock poisoned")
            .get(&(closure, field.id()))
            .cloned()
    }

    fn with_slot(
        &self,
        closure: &CpuClosure,
        update: impl FnOnce(&mut ClosureDesc<CpuClosure>) -> Option<&mut SlotDesc<CpuClosure>>,
        value: &Value,
        size: Option<usize>,
    ) -> Result<(), EngineError> {
        let mut closures = self.closures.write().expect("closures lock poisoned");
        let desc = closures
            .get_mut(closure.0)
            .ok_or_else(|| EngineError::UnknownClosure(format!("{closure:?}")))?;
        let slot = update(desc).ok_or_else(|| EngineError::UnboundSlot {
            closure: format!("{closure:?}"),
            slot: "unknown slot".into(),
        })?;
        slot.value = Some(value.clone());
        slot.size = size;
        slot.dependency = None;
        Ok(())
    }
}

impl GraphEngine for CpuEngine {
    type PlanHandle = PlanId;
    type ClosureHandle = CpuClosure;

    #[instrument(skip_all, name = "cpu_compile_edges")]
    fn compile_edge_graph(&self, graph: &EdgeGraphDesc) -> Result<Option<PlanId>, EngineError> {
        if !self.config.native_edge_graphs {
            debug!("native edge graphs disabled, declining");
            return Ok(None);
        }
        for kernel in &graph.kernels {
            self.kernel_fn(kernel)?;
        }

        let index: HashMap<KernelId, usize> = graph
            .kernels
            .iter()
            .enumerate()
            .map(|(i, k)| (k.id(), i))
            .collect();
        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); graph.kernels.len()];
        for edge in &graph.edges {
            let from = *index.get(&edge.from.id()).ok_or_else(|| {
                EngineError::Compilation(format!("edge source {} is not in the graph", edge.from))
            })?;
            match &edge.to {
                LineTarget::Kernel(to) => {
                    let to = *index.get(&to.id()).ok_or_else(|| {
                        EngineError::Compilation(format!("edge destination {to} is not in the graph"))
                    })?;
                    deps[to].push(from);
                }
                // Every kernel of the global's script reads it.
                LineTarget::Global(field) => {
                    for (i, kernel) in graph.kernels.iter().enumerate() {
                        if i != from && kernel.script() == field.script() {
                            deps[i].push(from);
                        }
                    }
                }
            }
        }

        let levels =
            topological_levels(&deps).map_err(|e| EngineError::Compilation(e.to_string()))?;

        let mut intermediates = IndexMap::new();
        for edge in &graph.edges {
            if !intermediates.contains_key(&edge.from.id()) {
                intermediates.insert(edge.from.id(), self.create_buffer(&edge.ty)?);
            }
        }

        let id = PlanId(self.next_plan.fetch_add(1, Ordering::Relaxed));
        info!(
            plan = id.0,
            kernels = graph.kernels.len(),
            levels = levels.len(),
            "edge plan compiled"
        );
        self.plans.write().expect("plans lock poisoned").insert(
            id,
            CompiledPlan::Edge(EdgePlan {
                kernels: graph.kernels.clone(),
                levels,
                edges: graph.edges.clone(),
                intermediates,
                inputs: IndexMap::new(),
                outputs: IndexMap::new(),
            }),
        );
        Ok(Some(id))
    }

    fn set_group_input(
        &self,
        plan: &PlanId,
        kernel: &KernelRef,
        buffer: &Buffer,
    ) -> Result<(), EngineError> {
        self.bind_edge_buffer(plan, kernel, buffer, false)
    }

    fn set_group_output(
        &self,
        plan: &PlanId,
        kernel: &KernelRef,
        buffer: &Buffer,
    ) -> Result<(), EngineError> {
        self.bind_edge_buffer(plan, kernel, buffer, true)
    }

    fn create_closure(&self, desc: ClosureDesc<CpuClosure>) -> Result<CpuClosure, EngineError> {
        self.callable_fn(&desc.callable)?;
        let mut closures = self.closures.write().expect("closures lock poisoned");
        for dep in desc
            .args
            .iter()
            .chain(desc.globals.iter().map(|(_, s)| s))
            .filter_map(|s| s.dependency.as_ref())
        {
            if dep.closure.0 >= closures.len() {
                return Err(EngineError::UnknownClosure(format!("{:?}", dep.closure)));
            }
        }
        let handle = CpuClosure(closures.len());
        closures.push(desc);
        Ok(handle)
    }

    fn set_closure_arg(
        &self,
        closure: &CpuClosure,
        index: usize,
        value: &Value,
        size: Option<usize>,
    ) -> Result<(), EngineError> {
        self.with_slot(closure, |desc| desc.args.get_mut(index), value, size)
    }

    fn set_closure_global(
        &self,
        closure: &CpuClosure,
        field: &FieldRef,
        value: &Value,
        size: Option<usize>,
    ) -> Result<(), EngineError> {
        self.with_slot(
            closure,
            |desc| {
                desc.globals
                    .iter_mut()
                    .find(|(f, _)| f.id() == field.id())
                    .map(|(_, slot)| slot)
            },
            value,
            size,
        )
    }

    #[instrument(skip_all, name = "cpu_compile_closures", fields(plan = name))]
    fn compile_closure_graph(
        &self,
        name: &str,
        cache_dir: &Path,
        closures: &[CpuClosure],
    ) -> Result<PlanId, EngineError> {
        let position: HashMap<CpuClosure, usize> =
            closures.iter().enumerate().map(|(i, c)| (*c, i)).collect();

        let all = self.closures.read().expect("closures lock poisoned");
        let mut shapes = Vec::with_capacity(closures.len());
        let mut entries = Vec::with_capacity(closures.len());
        for (i, handle) in closures.iter().enumerate() {
            let desc = all
                .get(handle.0)
                .ok_or_else(|| EngineError::UnknownClosure(format!("{handle:?}")))?;
            let mut deps = Vec::new();
            for dep in desc
                .args
                .iter()
                .chain(desc.globals.iter().map(|(_, s)| s))
                .filter_map(|s| s.dependency.as_ref())
            {
                match position.get(&dep.closure) {
                    Some(&p) if p < i => deps.push(p),
                    _ => {
                        return Err(EngineError::Compilation(format!(
                            "closure {i} reads {:?}, which is not declared before it in plan {name}",
                            dep.closure
                        )));
                    }
                }
            }
            deps.sort_unstable();
            deps.dedup();
            entries.push(ManifestClosure {
                callable: desc.callable.name().to_string(),
                function: desc.callable.is_function(),
                deps: deps.clone(),
            });
            shapes.push(ClosureShape {
                is_function: desc.callable.is_function(),
                deps,
            });
        }
        drop(all);

        let stages = ordering::stages(&shapes);

        if self.config.persist_manifests {
            let manifest = PlanManifest {
                name: name.to_string(),
                closures: entries,
                stages: stages.iter().map(ManifestStage::from).collect(),
            };
            let path = manifest.write(cache_dir)?;
            debug!(path = %path.display(), "manifest written");
        }

        let id = PlanId(self.next_plan.fetch_add(1, Ordering::Relaxed));
        info!(
            plan = id.0,
            closures = closures.len(),
            stages = stages.len(),
            "closure plan compiled"
        );
        self.plans.write().expect("plans lock poisoned").insert(
            id,
            CompiledPlan::Closure(ClosurePlanState {
                name: name.to_string(),
                closures: closures.to_vec(),
                stages,
            }),
        );
        Ok(id)
    }

    fn execute_plan(&self, plan: &PlanId) -> Result<(), EngineError> {
        let plans = self.plans.read().expect("plans lock poisoned");
        match plans.get(plan) {
            Some(CompiledPlan::Edge(edge)) => self.execute_edge(edge),
            Some(CompiledPlan::Closure(state)) => {
                trace!(plan = %state.name, "executing closure plan");
                self.execute_closures(state)
            }
            None => Err(EngineError::UnknownPlan(format!("{plan:?}"))),
        }
    }

    fn launch_kernel(
        &self,
        kernel: &KernelRef,
        input: Option<&Buffer>,
        output: Option<&Buffer>,
    ) -> Result<(), EngineError> {
        self.launch(&Callable::Kernel(kernel.clone()), input, output, &[])
    }

    fn bind_global(&self, field: &FieldRef, value: &Value) -> Result<(), EngineError> {
        self.globals.set(field, value.clone());
        Ok(())
    }

    fn read_global(&self, field: &FieldRef) -> Option<Value> {
        self.globals.get(field)
    }

    fn read_closure_global(&self, closure: &CpuClosure, field: &FieldRef) -> Option<Value> {
        self.closure_global(*closure, field)
    }

    fn release_plan(&self, plan: &PlanId) {
        if self
            .plans
            .write()
            .expect("plans lock poisoned")
            .shift_remove(plan)
            .is_some()
        {
            debug!(plan = plan.0, "plan released");
        }
    }
}
