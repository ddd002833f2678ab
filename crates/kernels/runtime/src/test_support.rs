//! Recording engine used by the runtime's unit tests.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use kgraph_foundation::{
    Buffer, BufferId, FieldId, FieldRef, KernelId, KernelRef, KernelSignature, Script, Value,
};

use crate::engine::{ClosureDesc, EdgeGraphDesc, EngineError, GraphEngine};

/// One call into the mock engine.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    CompileEdge { kernels: Vec<KernelId>, edges: usize },
    GroupInput(KernelId, BufferId),
    GroupOutput(KernelId, BufferId),
    CreateClosure(usize),
    SetArg { closure: usize, index: usize, value: Value },
    SetGlobal { closure: usize, field: FieldId, value: Value },
    CompileClosures { name: String, closures: Vec<usize> },
    Execute(u64),
    Launch { kernel: KernelId, input: Option<BufferId>, output: Option<BufferId> },
    BindGlobal(FieldId, Value),
    Release(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Native,
    Decline,
    Reject,
}

pub(crate) struct MockEngine {
    mode: Mode,
    calls: Mutex<Vec<Call>>,
    closures: Mutex<Vec<ClosureDesc<usize>>>,
    closure_globals: Mutex<IndexMap<(usize, FieldId), Value>>,
    next_plan: AtomicU64,
}

impl MockEngine {
    pub(crate) fn new(mode: Mode) -> Self {
        Self {
            mode,
            calls: Mutex::new(Vec::new()),
            closures: Mutex::new(Vec::new()),
            closure_globals: Mutex::new(IndexMap::new()),
            next_plan: AtomicU64::new(1),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn launches(&self) -> Vec<(KernelId, Option<BufferId>, Option<BufferId>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Launch {
                    kernel,
                    input,
                    output,
                } => Some((kernel, input, output)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn closure(&self, handle: usize) -> ClosureDesc<usize> {
        self.closures.lock().unwrap()[handle].clone()
    }

    /// Pretend `closure` left `value` in `field` when it last ran.
    pub(crate) fn set_closure_global_value(&self, closure: usize, field: &FieldRef, value: Value) {
        self.closure_globals
            .lock()
            .unwrap()
            .insert((closure, field.id()), value);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl GraphEngine for MockEngine {
    type PlanHandle = u64;
    type ClosureHandle = usize;

    fn compile_edge_graph(&self, graph: &EdgeGraphDesc) -> Result<Option<u64>, EngineError> {
        self.record(Call::CompileEdge {
            kernels: graph.kernels.iter().map(KernelRef::id).collect(),
            edges: graph.edges.len(),
        });
        match self.mode {
            Mode::Native => Ok(Some(self.next_plan.fetch_add(1, Ordering::Relaxed))),
            Mode::Decline => Ok(None),
            Mode::Reject => Err(EngineError::Compilation("rejected by mock".into())),
        }
    }

    fn set_group_input(&self, _: &u64, kernel: &KernelRef, buffer: &Buffer) -> Result<(), EngineError> {
        self.record(Call::GroupInput(kernel.id(), buffer.id()));
        Ok(())
    }

    fn set_group_output(&self, _: &u64, kernel: &KernelRef, buffer: &Buffer) -> Result<(), EngineError> {
        self.record(Call::GroupOutput(kernel.id(), buffer.id()));
        Ok(())
    }

    fn create_closure(&self, desc: ClosureDesc<usize>) -> Result<usize, EngineError> {
        let mut closures = self.closures.lock().unwrap();
        let handle = closures.len();
        closures.push(desc);
        drop(closures);
        self.record(Call::CreateClosure(handle));
        Ok(handle)
    }

    fn set_closure_arg(
        &self,
        closure: &usize,
        index: usize,
        value: &Value,
        size: Option<usize>,
    ) -> Result<(), EngineError> {
        let mut closures = self.closures.lock().unwrap();
        let slot = &mut closures[*closure].args[index];
        slot.value = Some(value.clone());
        slot.size = size;
        slot.dependency = None;
        drop(closures);
        self.record(Call::SetArg {
            closure: *closure,
            index,
            value: value.clone(),
        });
        Ok(())
    }

    fn set_closure_global(
        &self,
        closure: &usize,
        field: &FieldRef,
        value: &Value,
        size: Option<usize>,
    ) -> Result<(), EngineError> {
        let mut closures = self.closures.lock().unwrap();
        if let Some((_, slot)) = closures[*closure]
            .globals
            .iter_mut()
            .find(|(f, _)| f.id() == field.id())
        {
            slot.value = Some(value.clone());
            slot.size = size;
            slot.dependency = None;
        }
        drop(closures);
        self.record(Call::SetGlobal {
            closure: *closure,
            field: field.id(),
            value: value.clone(),
        });
        Ok(())
    }

    fn compile_closure_graph(
        &self,
        name: &str,
        _cache_dir: &Path,
        closures: &[usize],
    ) -> Result<u64, EngineError> {
        self.record(Call::CompileClosures {
            name: name.to_string(),
            closures: closures.to_vec(),
        });
        match self.mode {
            Mode::Reject => Err(EngineError::Compilation("rejected by mock".into())),
            _ => Ok(self.next_plan.fetch_add(1, Ordering::Relaxed)),
        }
    }

    fn execute_plan(&self, plan: &u64) -> Result<(), EngineError> {
        self.record(Call::Execute(*plan));
        Ok(())
    }

    fn launch_kernel(
        &self,
        kernel: &KernelRef,
        input: Option<&Buffer>,
        output: Option<&Buffer>,
    ) -> Result<(), EngineError> {
        self.record(Call::Launch {
            kernel: kernel.id(),
            input: input.map(Buffer::id),
            output: output.map(Buffer::id),
        });
        Ok(())
    }

    fn bind_global(&self, field: &FieldRef, value: &Value) -> Result<(), EngineError> {
        self.record(Call::BindGlobal(field.id(), value.clone()));
        Ok(())
    }

    fn read_closure_global(&self, closure: &usize, field: &FieldRef) -> Option<Value> {
        self.closure_globals
            .lock()
            .unwrap()
            .get(&(*closure, field.id()))
            .cloned()
    }

    fn release_plan(&self, plan: &u64) {
        self.record(Call::Release(*plan));
    }
}

/// A script with one in/out kernel named `"k"`.
pub(crate) fn script_with_kernel(name: &str) -> (Script, KernelRef) {
    let mut script = Script::new(name);
    let kernel = script.declare_kernel("k", KernelSignature::in_out());
    (script, kernel)
}
