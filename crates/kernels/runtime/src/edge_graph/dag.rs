//! Cycle detection, single-DAG validation and topological ordering.
//!
//! Nodes and lines are addressed by index. Every function here is pure over
//! the builder's node/line arenas except [`calc_order`], which writes the
//! order number back into each node.

use crate::error::{Error, Result};

use super::node::{ConnectLine, Node};

/// Disjoint-set forest over node indices.
///
/// Each root node seeds its own set; merging two sets is how DAG tags are
/// unified when a traversal reaches a node already claimed by another root.
#[derive(Debug)]
pub(crate) struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    pub(crate) fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    pub(crate) fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Whether following outgoing lines from `start` ever arrives back at `start`.
///
/// Iterative DFS with a visited set, O(V + E).
pub(crate) fn closes_cycle(nodes: &[Node], lines: &[ConnectLine], start: usize) -> bool {
    let mut visited = vec![false; nodes.len()];
    let mut stack = vec![start];

    while let Some(current) = stack.pop() {
        for &line in &nodes[current].outputs {
            let next = lines[line].to_node;
            if next == start {
                return true;
            }
            if !visited[next] {
                visited[next] = true;
                stack.push(next);
            }
        }
    }
    false
}

/// Check that the group forms exactly one connected DAG.
///
/// 1. A node with no lines at all is rejected unless it is the only node.
/// 2. Each root seeds a DAG tag and tags everything it reaches; reaching a
///    node tagged by another root merges the two tags. All nodes must end
///    up with the same tag.
pub(crate) fn validate_dag(nodes: &[Node], lines: &[ConnectLine]) -> Result<()> {
    if nodes.is_empty() {
        return Err(Error::EmptyGroup);
    }

    if nodes.len() > 1
        && let Some(isolated) = nodes.iter().find(|n| n.is_isolated())
    {
        return Err(Error::UnconnectedNode {
            script: isolated.script,
        });
    }

    let mut tags: Vec<Option<usize>> = vec![None; nodes.len()];
    let mut sets = DisjointSet::new(nodes.len());

    for root in (0..nodes.len()).filter(|&i| nodes[i].is_root()) {
        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            match tags[current] {
                Some(tag) => {
                    // Already claimed: merge with whoever claimed it, don't descend again.
                    sets.union(tag, root);
                    continue;
                }
                None => tags[current] = Some(root),
            }
            for &line in &nodes[current].outputs {
                stack.push(lines[line].to_node);
            }
        }
    }

    let mut distinct: Vec<usize> = Vec::new();
    let mut untagged = 0;
    for tag in &tags {
        match tag {
            Some(tag) => {
                let set = sets.find(*tag);
                if !distinct.contains(&set) {
                    distinct.push(set);
                }
            }
            None => untagged += 1,
        }
    }

    let count = distinct.len() + untagged;
    if count > 1 {
        return Err(Error::MultipleGraphs { count });
    }
    Ok(())
}

/// Assign order numbers and return node indices sorted by them.
///
/// From every root, DFS sets `order = max(order, parent + 1)` with roots at
/// zero. Reaching a node that is on the current DFS path is a cycle. The
/// final sort is stable, so nodes with equal order keep insertion order.
pub(crate) fn calc_order(nodes: &mut [Node], lines: &[ConnectLine]) -> Result<Vec<usize>> {
    for node in nodes.iter_mut() {
        node.order = 0;
    }

    let mut visited = vec![false; nodes.len()];
    let mut on_path = vec![false; nodes.len()];
    let roots: Vec<usize> = (0..nodes.len()).filter(|&i| nodes[i].is_root()).collect();

    for root in roots {
        visit(nodes, lines, root, &mut visited, &mut on_path)?;
    }

    let mut order: Vec<usize> = (0..nodes.len()).collect();
    order.sort_by_key(|&i| nodes[i].order);
    Ok(order)
}

/// Depth-first walk from `root`, raising every reached node's order to at
/// least its depth on the current path.
fn visit(
    nodes: &mut [Node],
    lines: &[ConnectLine],
    root: usize,
    visited: &mut [bool],
    on_path: &mut [bool],
) -> Result<()> {
    // (node, depth, next output line to follow)
    let mut stack: Vec<(usize, usize, usize)> = Vec::new();
    enter(nodes, root, 0, visited, on_path, &mut stack)?;

    while let Some(frame) = stack.last_mut() {
        let (current, depth, next) = *frame;
        match nodes[current].outputs.get(next) {
            Some(&line) => {
                frame.2 += 1;
                enter(nodes, lines[line].to_node, depth + 1, visited, on_path, &mut stack)?;
            }
            None => {
                on_path[current] = false;
                stack.pop();
            }
        }
    }
    Ok(())
}

fn enter(
    nodes: &mut [Node],
    current: usize,
    depth: usize,
    visited: &mut [bool],
    on_path: &mut [bool],
    stack: &mut Vec<(usize, usize, usize)>,
) -> Result<()> {
    if on_path[current] {
        return Err(Error::Cycle {
            from: nodes[current].script.to_string(),
            to: nodes[current].script.to_string(),
        });
    }
    if visited[current] && nodes[current].order >= depth {
        // Nothing downstream can move.
        return Ok(());
    }

    visited[current] = true;
    nodes[current].order = nodes[current].order.max(depth);
    on_path[current] = true;
    stack.push((current, depth, 0));
    Ok(())
}
