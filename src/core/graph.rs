//! Dependency resolver - builds the command DAG and orders it with Kahn's algorithm

use super::CommandInstance;
use crate::error::DependencyError;
use std::collections::VecDeque;

/// Compute an execution order in which every command follows its dependency
///
/// Ties between commands that become ready at the same time keep their list
/// order, so the result is deterministic for a given input.
pub fn resolve_execution_order(
    commands: &[CommandInstance],
) -> Result<Vec<usize>, DependencyError> {
    log::debug!("Resolving execution order for {} commands", commands.len());

    let total = commands.len();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); total];
    let mut in_degree = vec![0usize; total];

    for (index, command) in commands.iter().enumerate() {
        let Some(dependency) = command.dependency else {
            continue;
        };

        if dependency < 0 || dependency as usize >= total {
            return Err(DependencyError::InvalidDependency {
                dependency_index: dependency,
                command_index: index,
            });
        }

        dependents[dependency as usize].push(index);
        in_degree[index] += 1;
        log::debug!("Command {} depends on command {}", index, dependency);
    }

    let mut ready: VecDeque<usize> = (0..total).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(total);

    while let Some(current) = ready.pop_front() {
        order.push(current);

        for &next in &dependents[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if order.len() != total {
        return Err(DependencyError::CircularDependency);
    }

    Ok(order)
}
