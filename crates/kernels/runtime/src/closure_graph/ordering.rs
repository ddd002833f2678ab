//! Closure ordering contract.
//!
//! A closure plan has no scheduler of its own. Any order is legal if:
//!
//! 1. a kernel closure runs after every closure whose future it reads, and
//! 2. a function closure is a full barrier: everything declared before it
//!    finishes first, nothing declared after it starts until it returns.
//!
//! Declaration order always satisfies both rules. [`stages`] groups closures
//! into barrier-separated stages of mutually independent kernels, which is
//! how an engine may run them concurrently; [`verify_order`] checks any
//! proposed sequential order against the rules.

use thiserror::Error;

/// What the ordering rules need to know about one closure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClosureShape {
    /// Whether the closure calls an invocable function (a barrier).
    pub is_function: bool,
    /// Indices of the closures whose futures it reads. Always smaller than
    /// the closure's own index.
    pub deps: Vec<usize>,
}

impl ClosureShape {
    /// A kernel closure reading from `deps`.
    pub fn kernel(deps: impl Into<Vec<usize>>) -> Self {
        Self {
            is_function: false,
            deps: deps.into(),
        }
    }

    /// A function closure reading from `deps`.
    pub fn function(deps: impl Into<Vec<usize>>) -> Self {
        Self {
            is_function: true,
            deps: deps.into(),
        }
    }
}

/// A set of closures that may run concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Closure indices, ascending.
    pub closures: Vec<usize>,
    /// Whether this stage is a single function closure.
    pub barrier: bool,
}

/// Group closures into stages.
///
/// Between two barriers, each kernel closure lands one stage after the
/// latest of its dependencies in the same segment; dependencies before the
/// last barrier are already complete. Running stages in sequence, and the
/// closures inside a stage in any order, satisfies the contract.
pub fn stages(shapes: &[ClosureShape]) -> Vec<Stage> {
    let mut out = Vec::new();
    let mut segment_start = 0;
    let mut levels: Vec<usize> = vec![0; shapes.len()];
    let mut segment: Vec<Vec<usize>> = Vec::new();

    for (i, shape) in shapes.iter().enumerate() {
        if shape.is_function {
            flush(&mut out, &mut segment);
            out.push(Stage {
                closures: vec![i],
                barrier: true,
            });
            segment_start = i + 1;
            continue;
        }

        let level = shape
            .deps
            .iter()
            .filter(|&&d| d >= segment_start && d < i)
            .map(|&d| levels[d] + 1)
            .max()
            .unwrap_or(0);
        levels[i] = level;
        if segment.len() <= level {
            segment.resize_with(level + 1, Vec::new);
        }
        segment[level].push(i);
    }
    flush(&mut out, &mut segment);
    out
}

fn flush(out: &mut Vec<Stage>, segment: &mut Vec<Vec<usize>>) {
    out.extend(segment.drain(..).map(|closures| Stage {
        closures,
        barrier: false,
    }));
}

/// Check that `order` is a permutation of the closures that honours the
/// dependency and barrier rules.
pub fn verify_order(shapes: &[ClosureShape], order: &[usize]) -> Result<(), OrderingViolation> {
    let mut position: Vec<Option<usize>> = vec![None; shapes.len()];
    for (pos, &closure) in order.iter().enumerate() {
        let slot = position
            .get_mut(closure)
            .ok_or(OrderingViolation::UnknownClosure { closure })?;
        if slot.is_some() {
            return Err(OrderingViolation::Duplicate { closure });
        }
        *slot = Some(pos);
    }
    let position: Vec<usize> = position
        .into_iter()
        .enumerate()
        .map(|(closure, pos)| pos.ok_or(OrderingViolation::Missing { closure }))
        .collect::<Result<_, _>>()?;

    for (closure, shape) in shapes.iter().enumerate() {
        for &dependency in &shape.deps {
            if position.get(dependency).is_none_or(|&p| p >= position[closure]) {
                return Err(OrderingViolation::DependencyNotBefore {
                    closure,
                    dependency,
                });
            }
        }

        if shape.is_function {
            for other in 0..shapes.len() {
                let crossed = (other < closure && position[other] > position[closure])
                    || (other > closure && position[other] < position[closure]);
                if crossed {
                    return Err(OrderingViolation::BarrierCrossed {
                        barrier: closure,
                        closure: other,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Ways a proposed closure order can break the contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderingViolation {
    /// The order names a closure index the plan does not have.
    #[error("closure {closure} does not exist")]
    UnknownClosure {
        /// Offending index.
        closure: usize,
    },
    /// The order lists a closure twice.
    #[error("closure {closure} is scheduled twice")]
    Duplicate {
        /// Offending index.
        closure: usize,
    },
    /// The order leaves a closure out.
    #[error("closure {closure} is never scheduled")]
    Missing {
        /// Offending index.
        closure: usize,
    },
    /// A closure is scheduled before one of its producers.
    #[error("closure {closure} runs before its dependency {dependency}")]
    DependencyNotBefore {
        /// Consumer.
        closure: usize,
        /// Producer it reads from.
        dependency: usize,
    },
    /// A closure moved across a function barrier.
    #[error("closure {closure} crosses the barrier at function closure {barrier}")]
    BarrierCrossed {
        /// Function closure acting as barrier.
        barrier: usize,
        /// Closure scheduled on the wrong side of it.
        closure: usize,
    },
}
