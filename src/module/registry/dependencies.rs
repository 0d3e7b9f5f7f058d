//! Module dependency resolution
//!
//! Orders modules so that every module comes after the modules it requires.
//! Among modules that are ready at the same time, declaration order wins.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::module::traits::ModuleError;

/// Dependency resolver
pub struct ModuleDependencies;

impl ModuleDependencies {
    /// Start order over `modules` given as `(name, requires)` in declaration order
    ///
    /// Returns indices into `modules`. Every required name must be present
    /// in `modules`; unknown names are ignored here.
    pub fn resolve(modules: &[(String, Vec<String>)]) -> Result<Vec<usize>, ModuleError> {
        let index: HashMap<&str, usize> = modules
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; modules.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); modules.len()];
        for (i, (_, requires)) in modules.iter().enumerate() {
            let unique: BTreeSet<usize> = requires
                .iter()
                .filter_map(|r| index.get(r.as_str()).copied())
                .collect();
            for dep in unique {
                dependents[dep].push(i);
                in_degree[i] += 1;
            }
        }

        // Kahn's algorithm; the ordered ready set keeps declaration order on ties
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(modules.len());

        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &dependent in &dependents[next] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != modules.len() {
            let cycle = Self::find_cycle(modules, &index, &in_degree);
            return Err(ModuleError::CycleDependency(cycle));
        }

        debug!(
            "Dependency resolution complete: {:?}",
            order.iter().map(|&i| modules[i].0.as_str()).collect::<Vec<_>>()
        );
        Ok(order)
    }

    /// Walk unresolved requirements until a module repeats
    fn find_cycle(
        modules: &[(String, Vec<String>)],
        index: &HashMap<&str, usize>,
        in_degree: &[usize],
    ) -> Vec<String> {
        let unresolved = |i: usize| in_degree[i] > 0;
        let Some(start) = (0..modules.len()).find(|&i| unresolved(i)) else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut current = start;
        loop {
            // An unresolved module always has an unresolved requirement
            let Some(next) = modules[current]
                .1
                .iter()
                .filter_map(|r| index.get(r.as_str()).copied())
                .find(|&d| unresolved(d))
            else {
                return path.iter().map(|&i| modules[i].0.clone()).collect();
            };

            if let Some(pos) = path.iter().position(|&p| p == next) {
                let mut cycle: Vec<String> =
                    path[pos..].iter().map(|&i| modules[i].0.clone()).collect();
                cycle.push(modules[next].0.clone());
                return cycle;
            }
            path.push(next);
            current = next;
        }
    }
}
