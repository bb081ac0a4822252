//! Dependency-reference parsing, task validation, graph construction, and
//! cycle detection.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::model::Task;

use super::SchedulerError;

/// Separator between the plan path and the task number in a cross-file
/// reference.
const CROSS_FILE_TASK_SEGMENT: &str = ":task:";

/// A parsed dependency reference.
///
/// Cross-file references have the form `file:<plan>:task:<number>`. A
/// malformed form without the `:task:` segment is treated as a plain local
/// reference (and typically fails validation as unknown).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyRef<'a> {
    Local(&'a str),
    CrossFile {
        plan_path: &'a str,
        number: &'a str,
        raw: &'a str,
    },
}

impl<'a> DependencyRef<'a> {
    /// The task number the reference resolves to for scheduling purposes.
    pub fn target(&self) -> &'a str {
        match self {
            DependencyRef::Local(number) => number,
            DependencyRef::CrossFile { number, .. } => number,
        }
    }
}

/// Parse a dependency reference string.
pub fn parse_dependency_ref(raw: &str) -> DependencyRef<'_> {
    if let Some(rest) = raw.strip_prefix("file:") {
        if let Some(idx) = rest.find(CROSS_FILE_TASK_SEGMENT) {
            return DependencyRef::CrossFile {
                plan_path: &rest[..idx],
                number: &rest[idx + CROSS_FILE_TASK_SEGMENT.len()..],
                raw,
            };
        }
    }
    DependencyRef::Local(raw)
}

/// Validate a combined task set: non-empty unique numbers and resolvable
/// dependency references.
pub fn validate_tasks(tasks: &[Task]) -> Result<(), SchedulerError> {
    let mut seen = HashSet::new();
    for task in tasks {
        if task.number.is_empty() {
            return Err(SchedulerError::EmptyNumber {
                name: task.name.clone(),
            });
        }
        if !seen.insert(task.number.as_str()) {
            return Err(SchedulerError::DuplicateNumber {
                number: task.number.clone(),
            });
        }
    }

    for task in tasks {
        for dep in &task.depends_on {
            let target = parse_dependency_ref(dep).target();
            if !seen.contains(target) {
                return Err(SchedulerError::UnknownDependency {
                    task: task.number.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    Ok(())
}

/// The dependency graph over task numbers.
///
/// `edges` maps a dependency to its dependents; `in_degree` counts incoming
/// edges per task. Cross-file references are stored resolved to their local
/// target number; the originals live on [`FileAwareDependencyGraph`].
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    pub tasks: HashSet<String>,
    pub edges: HashMap<String, Vec<String>>,
    pub in_degree: HashMap<String, usize>,
    /// Task number -> worktree group, for tasks that declare one.
    pub groups: HashMap<String, String>,
}

impl DependencyGraph {
    /// The direct dependencies of a task (reverse of `edges`).
    pub fn dependencies_of(&self, number: &str) -> Vec<&str> {
        let mut deps = Vec::new();
        for (dep, dependents) in &self.edges {
            if dependents.iter().any(|d| d == number) {
                deps.push(dep.as_str());
            }
        }
        deps
    }
}

/// A cross-file reference preserved for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossFileRef {
    /// The task declaring the dependency.
    pub task: String,
    /// The full reference string as written.
    pub raw: String,
    /// The referenced plan path.
    pub plan_path: String,
    /// The resolved target task number.
    pub target_number: String,
}

/// A dependency graph plus the original cross-file reference strings.
#[derive(Debug, Clone, Default)]
pub struct FileAwareDependencyGraph {
    pub graph: DependencyGraph,
    pub cross_file_refs: Vec<CrossFileRef>,
}

/// Build the dependency graph for a validated task set.
///
/// Self-references remain as edges so the cycle detector reports them.
pub fn build_dependency_graph(tasks: &[Task]) -> DependencyGraph {
    build_file_aware_dependency_graph(tasks).graph
}

/// Build the dependency graph, retaining cross-file reference strings for
/// diagnostic reporting.
pub fn build_file_aware_dependency_graph(tasks: &[Task]) -> FileAwareDependencyGraph {
    let mut graph = DependencyGraph::default();
    let mut cross_file_refs = Vec::new();

    for task in tasks {
        graph.tasks.insert(task.number.clone());
        graph.in_degree.entry(task.number.clone()).or_insert(0);
        if let Some(group) = &task.worktree_group {
            graph.groups.insert(task.number.clone(), group.clone());
        }
    }

    for task in tasks {
        for dep in &task.depends_on {
            let parsed = parse_dependency_ref(dep);
            if let DependencyRef::CrossFile {
                plan_path, number, raw,
            } = &parsed
            {
                cross_file_refs.push(CrossFileRef {
                    task: task.number.clone(),
                    raw: (*raw).to_string(),
                    plan_path: (*plan_path).to_string(),
                    target_number: (*number).to_string(),
                });
            }

            let target = parsed.target();
            if !graph.tasks.contains(target) {
                // Unknown targets are reported by validate_tasks; skip here.
                continue;
            }
            graph
                .edges
                .entry(target.to_string())
                .or_default()
                .push(task.number.clone());
            *graph.in_degree.entry(task.number.clone()).or_insert(0) += 1;
        }
    }

    FileAwareDependencyGraph {
        graph,
        cross_file_refs,
    }
}

/// Detect a dependency cycle using Kahn's algorithm.
///
/// Repeatedly removes zero-in-degree nodes; a cycle exists iff any node
/// remains. Returns the sorted numbers of the tasks left on the cycle.
pub fn detect_cycle(graph: &DependencyGraph) -> Option<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = graph
        .in_degree
        .iter()
        .map(|(k, v)| (k.as_str(), *v))
        .collect();

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut removed = 0usize;
    while let Some(node) = queue.pop_front() {
        removed += 1;
        if let Some(dependents) = graph.edges.get(node) {
            for dependent in dependents {
                let deg = in_degree
                    .get_mut(dependent.as_str())
                    .expect("dependent is a known task");
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(dependent.as_str());
                }
            }
        }
    }

    if removed == graph.tasks.len() {
        return None;
    }

    let mut remaining: Vec<String> = in_degree
        .iter()
        .filter(|(_, deg)| **deg > 0)
        .map(|(name, _)| (*name).to_string())
        .collect();
    remaining.sort_by(|a, b| super::compare_task_numbers(a, b));
    Some(remaining)
}
