//! Registry prerequisite validation: every consumer of a cross-task symbol
//! must transitively depend on at least one producer of it.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::Task;

use super::graph::parse_dependency_ref;
use super::SchedulerError;

/// Cross-task symbol registry: which tasks define a named symbol and which
/// tasks use it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolRegistry {
    /// Symbol -> task numbers that define it.
    #[serde(default)]
    pub producers: BTreeMap<String, Vec<String>>,
    /// Symbol -> task numbers that use it.
    #[serde(default)]
    pub consumers: BTreeMap<String, Vec<String>>,
}

/// Validate registry prerequisites. A missing registry passes.
///
/// A consumer that is itself a producer of the symbol satisfies the
/// prerequisite.
pub fn validate_registry_prerequisites(
    tasks: &[Task],
    registry: Option<&SymbolRegistry>,
) -> Result<(), SchedulerError> {
    let Some(registry) = registry else {
        return Ok(());
    };

    let deps = direct_dependencies(tasks);

    for (symbol, consumers) in &registry.consumers {
        let producers = registry
            .producers
            .get(symbol)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        for consumer in consumers {
            let satisfied = producers.iter().any(|producer| {
                producer == consumer || depends_transitively(&deps, consumer, producer)
            });
            if !satisfied {
                return Err(SchedulerError::MissingRegistryPrerequisite {
                    consumer: consumer.clone(),
                    symbol: symbol.clone(),
                });
            }
        }
    }

    Ok(())
}

fn direct_dependencies(tasks: &[Task]) -> HashMap<String, Vec<String>> {
    let known: HashSet<&str> = tasks.iter().map(|t| t.number.as_str()).collect();
    let mut deps: HashMap<String, Vec<String>> = HashMap::new();
    for task in tasks {
        let entry = deps.entry(task.number.clone()).or_default();
        for dep in &task.depends_on {
            let target = parse_dependency_ref(dep).target();
            if known.contains(target) {
                entry.push(target.to_string());
            }
        }
    }
    deps
}

fn depends_transitively(deps: &HashMap<String, Vec<String>>, from: &str, to: &str) -> bool {
    let mut stack = vec![from];
    let mut visited: HashSet<&str> = HashSet::new();
    while let Some(current) = stack.pop() {
        if !visited.insert(current) {
            continue;
        }
        if let Some(direct) = deps.get(current) {
            for dep in direct {
                if dep == to {
                    return true;
                }
                stack.push(dep.as_str());
            }
        }
    }
    false
}
