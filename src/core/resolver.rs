//! Dependency DAG construction over the stack graph.
//!
//! Edges come from each resource's references (an instance depends on its
//! network, security group and role). Topological order uses Kahn's algorithm;
//! among ready resources the alphabetically smallest id goes first.

use super::types::*;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

/// Build a topological order of construct ids, dependencies first.
pub fn build_dependency_order(stack: &Stack) -> Result<Vec<String>, String> {
    let ids: Vec<&str> = stack.resources.iter().map(|r| r.id()).collect();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for &id in &ids {
        if in_degree.insert(id, 0).is_some() {
            return Err(format!("duplicate id '{}'", id));
        }
        adjacency.insert(id, Vec::new());
    }

    for resource in &stack.resources {
        // Same resource referenced twice (e.g. one network via two paths) is one edge
        let deps: BTreeSet<&str> = resource.references().into_iter().collect();
        for dep in deps {
            if dep == resource.id() {
                return Err(format!("'{}' references itself", dep));
            }
            let edges = adjacency
                .get_mut(dep)
                .ok_or_else(|| format!("'{}' references unknown '{}'", resource.id(), dep))?;
            edges.push(resource.id());
            if let Some(d) = in_degree.get_mut(resource.id()) {
                *d += 1;
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<&str>> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| Reverse(*id))
        .collect();

    let mut order = Vec::with_capacity(ids.len());
    while let Some(Reverse(current)) = ready.pop() {
        order.push(current.to_string());

        for &neighbor in adjacency.get(current).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(degree) = in_degree.get_mut(neighbor) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(neighbor));
                }
            }
        }
    }

    if order.len() != ids.len() {
        let mut cycle_members: Vec<&str> = ids
            .iter()
            .copied()
            .filter(|id| !order.iter().any(|o| o == id))
            .collect();
        cycle_members.sort_unstable();
        return Err(format!(
            "dependency cycle detected involving: {}",
            cycle_members.join(", ")
        ));
    }

    Ok(order)
}

/// Resources in dependency order.
pub fn ordered_resources(stack: &Stack) -> Result<Vec<&StackResource>, String> {
    let order = build_dependency_order(stack)?;
    order
        .iter()
        .map(|id| {
            stack
                .get(id)
                .ok_or_else(|| format!("resource '{}' vanished during ordering", id))
        })
        .collect()
}
