//! Dependency ordering of components.

use std::collections::BTreeSet;

/// A component as seen by the sorter.
#[derive(Debug, Clone)]
pub(crate) struct SortNode {
    pub has_requirement: bool,
    /// Indices of components that must run before this one.
    pub dependencies: Vec<usize>,
}

/// Components in execution order, with the dependency level of each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Sorted {
    pub order: Vec<usize>,
    /// Level per component index: 0 without dependencies, otherwise one more
    /// than the deepest dependency.
    pub levels: Vec<usize>,
}

/// Kahn's algorithm. Among ready components, the ones without a requirement
/// come first, then configuration order.
///
/// Returns the indices left unsorted when the dependencies form a cycle.
pub(crate) fn sort(nodes: &[SortNode]) -> Result<Sorted, Vec<usize>> {
    let mut indegree: Vec<usize> = nodes.iter().map(|n| n.dependencies.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (index, node) in nodes.iter().enumerate() {
        for dependency in &node.dependencies {
            dependents[*dependency].push(index);
        }
    }

    let mut ready: BTreeSet<(bool, usize)> = nodes
        .iter()
        .enumerate()
        .filter(|(index, _)| indegree[*index] == 0)
        .map(|(index, node)| (node.has_requirement, index))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    let mut levels = vec![0; nodes.len()];

    while let Some(next) = ready.pop_first() {
        let (_, index) = next;
        order.push(index);
        for dependent in &dependents[index] {
            levels[*dependent] = levels[*dependent].max(levels[index] + 1);
            indegree[*dependent] -= 1;
            if indegree[*dependent] == 0 {
                ready.insert((nodes[*dependent].has_requirement, *dependent));
            }
        }
    }

    if order.len() < nodes.len() {
        let remaining = (0..nodes.len()).filter(|i| !order.contains(i)).collect();
        return Err(remaining);
    }

    Ok(Sorted { order, levels })
}
