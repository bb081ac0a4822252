//! Dependency/wave scheduler.
//!
//! Turns a flat task list into an ordered sequence of waves: validates the
//! task set, builds the dependency graph (including cross-file references),
//! rejects cycles, partitions by dependency level, and checks that no two
//! tasks inside a wave write the same file or source package.
//!
//! Scheduling is pure: any error aborts the whole plan before execution
//! starts. There is no partial scheduling.

pub mod conflicts;
pub mod graph;
pub mod registry;
pub mod waves;

use std::cmp::Ordering;

use thiserror::Error;

pub use conflicts::{normalize_path, validate_file_overlaps, validate_package_conflicts};
pub use graph::{
    build_dependency_graph, build_file_aware_dependency_graph, detect_cycle, parse_dependency_ref,
    validate_tasks, CrossFileRef, DependencyGraph, DependencyRef, FileAwareDependencyGraph,
};
pub use registry::{validate_registry_prerequisites, SymbolRegistry};
pub use waves::{calculate_waves, calculate_waves_with, WaveOptions};

/// Errors from plan validation and wave computation.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task {name:?} has an empty number")]
    EmptyNumber { name: String },

    #[error("duplicate task number: {number:?}")]
    DuplicateNumber { number: String },

    #[error("task {task:?} depends on non-existent task {dependency:?}")]
    UnknownDependency { task: String, dependency: String },

    #[error("dependency cycle detected involving tasks: {0}")]
    CycleDetected(String),

    #[error(
        "file overlap in {wave}: {path:?} is modified by both {first:?} and {second:?}. \
         Move the conflicting tasks to different waves or add a dependency between them"
    )]
    FileOverlap {
        wave: String,
        path: String,
        first: String,
        second: String,
    },

    #[error(
        "package conflict in {wave}: {first:?} and {second:?} both modify source files in \
         package {package:?}. Move the conflicting tasks to different waves or add a \
         dependency between them"
    )]
    PackageConflict {
        wave: String,
        package: String,
        first: String,
        second: String,
    },

    #[error(
        "registry prerequisite violation: task {consumer:?} consumes symbol {symbol:?} \
         but does not depend on any producer of it"
    )]
    MissingRegistryPrerequisite { consumer: String, symbol: String },
}

/// Ordering for task numbers: numeric-parseable numbers sort first,
/// ascending by parsed value; the rest sort lexicographically after them.
pub fn compare_task_numbers(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
