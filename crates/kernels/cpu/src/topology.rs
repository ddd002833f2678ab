//! Level scheduling for compiled edge graphs.

use thiserror::Error;

/// Error returned when the kernel dependencies of an edge graph loop.
#[derive(Debug, Error)]
#[error("dependency cycle through kernels {involved:?}")]
pub struct CycleError {
    /// Indices of the kernels that could not be scheduled.
    pub involved: Vec<usize>,
}

/// Compute topological levels using Kahn's algorithm.
///
/// `deps[i]` lists the kernels `i` must wait for. Every level contains only
/// kernels whose dependencies all sit in earlier levels; within a level,
/// indices are ascending.
pub(crate) fn topological_levels(deps: &[Vec<usize>]) -> Result<Vec<Vec<usize>>, CycleError> {
    let n = deps.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (node, node_deps) in deps.iter().enumerate() {
        let mut seen: Vec<usize> = node_deps.clone();
        seen.sort_unstable();
        seen.dedup();
        for dep in seen {
            in_degree[node] += 1;
            dependents[dep].push(node);
        }
    }

    let mut levels = Vec::new();
    let mut current: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut processed = 0;

    while !current.is_empty() {
        current.sort_unstable();
        processed += current.len();

        let mut next = Vec::new();
        for &node in &current {
            for &dependent in &dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        levels.push(std::mem::replace(&mut current, next));
    }

    if processed != n {
        return Err(CycleError {
            involved: (0..n).filter(|&i| in_degree[i] > 0).collect(),
        });
    }
    Ok(levels)
}
