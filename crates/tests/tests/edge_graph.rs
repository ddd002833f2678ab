//! End-to-end tests of the edge-graph model.
//!
//! Every test runs against the CPU engine twice where it matters: once with
//! native edge plans and once with the engine declining them, which drives
//! the runtime's local sequential fallback.

use kgraph_cpu::{CpuEngine, CpuEngineConfig, KernelRegistry, fill_f32};
use kgraph_foundation::{Buffer, KernelRef, KernelSignature, Script, Value};
use kgraph_runtime::{EngineError, Error, GraphConfig, GraphContext, GraphEngine};
use kgraph_tests::{TestHarness, f32_buffer, f32_type, init_logging, read_f32};

fn harnesses() -> [TestHarness; 2] {
    [TestHarness::new(), TestHarness::fallback()]
}

// ============================================================================
// Validation
// ============================================================================

/// A connection closing a cycle is rejected and leaves the edge set as it
/// was; the remaining graph still builds and runs.
#[test]
fn test_cycle_rejected_edge_set_unchanged() {
    for harness in harnesses() {
        let s = &harness.scripts;
        let mut builder = harness.ctx().edge_builder();
        builder
            .add_kernel(&s.iota)
            .unwrap()
            .add_kernel(&s.double)
            .unwrap()
            .add_kernel(&s.increment)
            .unwrap();
        builder
            .add_connection(f32_type(), &s.iota, &s.double)
            .unwrap()
            .add_connection(f32_type(), &s.double, &s.increment)
            .unwrap();

        let before = builder.line_count();
        let err = builder
            .add_connection(f32_type(), &s.increment, &s.double)
            .unwrap_err();
        assert!(matches!(err, Error::Cycle { .. }), "got {err:?}");
        assert_eq!(builder.line_count(), before);

        let mut group = builder.create().unwrap();
        let out = Buffer::new(f32_type());
        group.set_output(&s.increment, out.clone()).unwrap();
        group.execute().unwrap();
        assert_eq!(out.read_as::<f32>(), vec![1.0, 3.0, 5.0, 7.0]);
    }
}

/// Two non-overlapping DAGs in one builder cannot form a group.
#[test]
fn test_two_disjoint_graphs_rejected() {
    let harness = TestHarness::new();
    let s = &harness.scripts;
    let mut builder = harness.ctx().edge_builder();
    for kernel in [&s.iota, &s.double, &s.negate, &s.increment] {
        builder.add_kernel(kernel).unwrap();
    }
    builder
        .add_connection(f32_type(), &s.iota, &s.double)
        .unwrap()
        .add_connection(f32_type(), &s.negate, &s.increment)
        .unwrap();

    let err = builder.create().unwrap_err();
    assert!(matches!(err, Error::MultipleGraphs { count: 2 }), "got {err:?}");
    assert_eq!(harness.engine().plan_count(), 0);
}

/// A script with no connections is rejected in a multi-script group, but a
/// single unconnected kernel is a valid group.
#[test]
fn test_isolated_node() {
    let harness = TestHarness::new();
    let s = &harness.scripts;

    let mut builder = harness.ctx().edge_builder();
    for kernel in [&s.iota, &s.double, &s.negate] {
        builder.add_kernel(kernel).unwrap();
    }
    builder
        .add_connection(f32_type(), &s.iota, &s.double)
        .unwrap();
    let err = builder.create().unwrap_err();
    assert!(
        matches!(err, Error::UnconnectedNode { script } if script == s.negate.script()),
        "got {err:?}"
    );

    for harness in harnesses() {
        let s = &harness.scripts;
        let mut builder = harness.ctx().edge_builder();
        builder.add_kernel(&s.iota).unwrap();
        let mut group = builder.create().unwrap();
        assert_eq!(group.outputs().collect::<Vec<_>>(), vec![&s.iota]);
        assert_eq!(group.inputs().count(), 0);

        let out = Buffer::new(f32_type());
        group.set_output(&s.iota, out.clone()).unwrap();
        group.execute().unwrap();
        assert_eq!(out.read_as::<f32>(), vec![0.0, 1.0, 2.0, 3.0]);
    }
}

#[test]
fn test_connection_to_unknown_kernel() {
    let harness = TestHarness::new();
    let s = &harness.scripts;
    let mut builder = harness.ctx().edge_builder();
    builder.add_kernel(&s.iota).unwrap();

    let err = builder
        .add_connection(f32_type(), &s.iota, &s.double)
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }), "got {err:?}");
    assert_eq!(builder.line_count(), 0);
}

/// Kernels of one script share a node, so wiring them together is a cycle.
#[test]
fn test_same_script_connection_is_a_cycle() {
    let harness = TestHarness::new();
    let s = &harness.scripts;
    let mut builder = harness.ctx().edge_builder();
    builder
        .add_kernel(&s.twin_double)
        .unwrap()
        .add_kernel(&s.twin_increment)
        .unwrap();
    assert_eq!(builder.node_count(), 1);

    let err = builder
        .add_connection(f32_type(), &s.twin_double, &s.twin_increment)
        .unwrap_err();
    assert!(matches!(err, Error::Cycle { .. }), "got {err:?}");
}

#[test]
fn test_declined_graph_without_fallback_fails() {
    let harness = TestHarness::with_config(
        CpuEngineConfig::declining(),
        GraphConfig::default().with_fallback(false),
    );
    let s = &harness.scripts;
    let mut builder = harness.ctx().edge_builder();
    builder.add_kernel(&s.iota).unwrap();

    let err = builder.create().unwrap_err();
    assert!(
        matches!(err, Error::Compilation(EngineError::Compilation(_))),
        "got {err:?}"
    );
}

// ============================================================================
// Ordering
// ============================================================================

/// Small deterministic generator for graph shapes.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

/// Random connected DAG over `n` single-kernel scripts: a random spanning
/// tree along a shuffled order, plus a few forward shortcuts.
fn generated_dag(seed: u64, n: usize) -> (Vec<KernelRef>, Vec<(usize, usize)>) {
    let mut rng = Lcg(seed);
    let kernels: Vec<KernelRef> = (0..n)
        .map(|i| {
            let mut script = Script::new(format!("gen{i}"));
            script.declare_kernel(&format!("k{i}"), KernelSignature::in_out())
        })
        .collect();

    let mut perm: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        perm.swap(i, rng.below(i + 1));
    }

    let mut edges = Vec::new();
    for j in 1..n {
        edges.push((perm[rng.below(j)], perm[j]));
    }
    for _ in 0..n / 2 {
        let a = rng.below(n - 1);
        let b = a + 1 + rng.below(n - 1 - a);
        let edge = (perm[a], perm[b]);
        if !edges.contains(&edge) {
            edges.push(edge);
        }
    }
    (kernels, edges)
}

/// For every line `u -> v`, `order(u) < order(v)`, and the engine launched
/// `u` before `v`.
#[test]
fn test_topological_order_over_generated_graphs() {
    init_logging();
    for seed in 1..=16 {
        for native in [true, false] {
            let (kernels, edges) = generated_dag(seed, 9);
            let mut registry = KernelRegistry::new();
            for (i, kernel) in kernels.iter().enumerate() {
                registry.register_kernel_fn(kernel, fill_f32(i as f32));
            }
            let config = CpuEngineConfig {
                native_edge_graphs: native,
                ..CpuEngineConfig::default()
            };
            let ctx = GraphContext::new(CpuEngine::new(registry, config));

            let mut builder = ctx.edge_builder();
            for kernel in &kernels {
                builder.add_kernel(kernel).unwrap();
            }
            for &(from, to) in &edges {
                builder
                    .add_connection(f32_type(), &kernels[from], &kernels[to])
                    .unwrap();
            }
            let mut group = builder.create().unwrap();
            assert_eq!(group.is_native(), native);

            for line in group.lines() {
                let to = match line.to() {
                    kgraph_runtime::LineTarget::Kernel(k) => k,
                    other => panic!("unexpected target {other}"),
                };
                let from_order = group.node_order(line.from().script()).unwrap();
                let to_order = group.node_order(to.script()).unwrap();
                assert!(
                    from_order < to_order,
                    "seed {seed}: {} ({from_order}) -> {to} ({to_order})",
                    line.from()
                );
            }

            let outputs: Vec<KernelRef> = group.outputs().cloned().collect();
            for kernel in &outputs {
                group.set_output(kernel, Buffer::new(f32_type())).unwrap();
            }
            group.execute().unwrap();

            let launched: Vec<String> = ctx
                .engine()
                .launches()
                .into_iter()
                .map(|r| r.callable)
                .collect();
            assert_eq!(launched.len(), kernels.len());
            let position = |k: &KernelRef| {
                launched
                    .iter()
                    .position(|name| name == k.name())
                    .unwrap()
            };
            for &(from, to) in &edges {
                assert!(
                    position(&kernels[from]) < position(&kernels[to]),
                    "seed {seed}: {} launched after {}",
                    kernels[from],
                    kernels[to]
                );
            }
        }
    }
}

/// Roots get order 0 and a diamond's join sits below its deepest parent.
#[test]
fn test_order_numbers_of_a_diamond() {
    let harness = TestHarness::new();
    let s = &harness.scripts;
    let mut builder = harness.ctx().edge_builder();
    for kernel in [&s.iota, &s.double, &s.negate, &s.increment, &s.scale] {
        builder.add_kernel(kernel).unwrap();
    }
    builder
        .add_connection(f32_type(), &s.iota, &s.double)
        .unwrap()
        .add_connection(f32_type(), &s.iota, &s.negate)
        .unwrap()
        .add_connection(f32_type(), &s.negate, &s.increment)
        .unwrap()
        .add_connection(f32_type(), &s.double, &s.scale)
        .unwrap()
        .add_connection(f32_type(), &s.increment, &s.scale)
        .unwrap();

    let group = builder.create().unwrap();
    let order = |k: &KernelRef| group.node_order(k.script()).unwrap();
    assert_eq!(order(&s.iota), 0);
    assert_eq!(order(&s.double), 1);
    assert_eq!(order(&s.negate), 1);
    assert_eq!(order(&s.increment), 2);
    assert_eq!(order(&s.scale), 3);
    assert_eq!(group.order().len(), 5);
}

// ============================================================================
// Execution
// ============================================================================

/// A producer feeding two consumers writes one buffer that both read.
#[test]
fn test_fan_out_shares_one_buffer() {
    for harness in harnesses() {
        let s = &harness.scripts;
        let mut builder = harness.ctx().edge_builder();
        for kernel in [&s.iota, &s.double, &s.negate] {
            builder.add_kernel(kernel).unwrap();
        }
        builder
            .add_connection(f32_type(), &s.iota, &s.double)
            .unwrap()
            .add_connection(f32_type(), &s.iota, &s.negate)
            .unwrap();

        let mut group = builder.create().unwrap();
        let doubled = Buffer::new(f32_type());
        let negated = Buffer::new(f32_type());
        group.set_output(&s.double, doubled.clone()).unwrap();
        group.set_output(&s.negate, negated.clone()).unwrap();
        group.execute().unwrap();

        assert_eq!(doubled.read_as::<f32>(), vec![0.0, 2.0, 4.0, 6.0]);
        assert_eq!(negated.read_as::<f32>(), vec![0.0, -1.0, -2.0, -3.0]);

        if !group.is_native() {
            let lines = group.lines();
            let (Some(a), Some(b)) = (lines[0].buffer(), lines[1].buffer()) else {
                panic!("fallback did not materialize the fan-out buffer");
            };
            assert!(a.same_as(b));
        }
    }
}

/// External inputs feed the group; rebinding replaces the buffer.
#[test]
fn test_bound_inputs_and_rebinding() {
    for harness in harnesses() {
        let s = &harness.scripts;
        let mut builder = harness.ctx().edge_builder();
        builder
            .add_kernel(&s.double)
            .unwrap()
            .add_kernel(&s.negate)
            .unwrap();
        builder
            .add_connection(f32_type(), &s.double, &s.negate)
            .unwrap();

        let mut group = builder.create().unwrap();
        assert_eq!(group.inputs().collect::<Vec<_>>(), vec![&s.double]);
        let out = Buffer::new(f32_type());
        group.set_output(&s.negate, out.clone()).unwrap();

        group
            .set_input(&s.double, f32_buffer([1.0, 2.0, 3.0, 4.0]))
            .unwrap();
        group.execute().unwrap();
        assert_eq!(out.read_as::<f32>(), vec![-2.0, -4.0, -6.0, -8.0]);

        group
            .set_input(&s.double, f32_buffer([0.5, 0.5, 0.5, 0.5]))
            .unwrap();
        group.execute().unwrap();
        assert_eq!(out.read_as::<f32>(), vec![-1.0; 4]);

        let err = group
            .set_input(&s.negate, Buffer::new(f32_type()))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }), "got {err:?}");
    }
}

/// A line into a global binds the producer's buffer to that global before
/// the reading script runs.
#[test]
fn test_global_destination() {
    for harness in harnesses() {
        let s = &harness.scripts;
        let mut builder = harness.ctx().edge_builder();
        builder
            .add_kernel(&s.scale_table)
            .unwrap()
            .add_kernel(&s.iota)
            .unwrap();
        builder
            .add_connection(f32_type(), &s.iota, &s.table)
            .unwrap();

        let mut group = builder.create().unwrap();
        assert_eq!(group.node_order(s.iota.script()), Some(0));
        assert_eq!(group.node_order(s.scale_table.script()), Some(1));

        let out = Buffer::new(f32_type());
        group.set_output(&s.scale_table, out.clone()).unwrap();
        group.execute().unwrap();
        assert_eq!(out.read_as::<f32>(), vec![0.0, 1.0, 2.0, 3.0]);

        let bound = harness.engine().read_global(&s.table).expect("table bound");
        assert_eq!(read_f32(&bound), vec![0.0, 1.0, 2.0, 3.0]);
    }
}

/// Kernels reading a global set on the engine see it in both modes.
#[test]
fn test_kernel_reads_engine_global() {
    for harness in harnesses() {
        let s = &harness.scripts;
        harness
            .engine()
            .bind_global(&s.factor, &Value::Float(10.0))
            .unwrap();

        let mut builder = harness.ctx().edge_builder();
        builder
            .add_kernel(&s.iota)
            .unwrap()
            .add_kernel(&s.scale)
            .unwrap();
        builder
            .add_connection(f32_type(), &s.iota, &s.scale)
            .unwrap();

        let mut group = builder.create().unwrap();
        let out = Buffer::new(f32_type());
        group.set_output(&s.scale, out.clone()).unwrap();
        group.execute().unwrap();
        assert_eq!(out.read_as::<f32>(), vec![0.0, 10.0, 20.0, 30.0]);
    }
}

#[test]
fn test_dropping_group_releases_native_plan() {
    let harness = TestHarness::new();
    let s = &harness.scripts;
    let mut builder = harness.ctx().edge_builder();
    builder.add_kernel(&s.iota).unwrap();
    let group = builder.create().unwrap();
    assert!(group.is_native());
    assert_eq!(harness.engine().plan_count(), 1);

    drop(group);
    assert_eq!(harness.engine().plan_count(), 0);
}
