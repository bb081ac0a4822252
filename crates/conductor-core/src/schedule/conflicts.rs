//! Per-wave safety validation: no two tasks in the same wave may write the
//! same file, and no two may modify the same source-code package unless one
//! transitively depends on the other.

use std::collections::{HashMap, HashSet};

use crate::model::{Task, Wave};

use super::graph::parse_dependency_ref;
use super::SchedulerError;

/// Normalise a declared file path: strip `./` segments, unify separators,
/// drop empty components.
pub fn normalize_path(path: &str) -> String {
    path.trim()
        .replace('\\', "/")
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Reject waves in which two tasks declare the same file.
///
/// A task with an empty `files` list gets a warning but does not fail
/// validation.
pub fn validate_file_overlaps(waves: &[Wave], tasks: &[Task]) -> Result<(), SchedulerError> {
    let tasks_by_number: HashMap<&str, &Task> =
        tasks.iter().map(|t| (t.number.as_str(), t)).collect();

    for wave in waves {
        // path -> name of the task that claimed it.
        let mut claimed: HashMap<String, &str> = HashMap::new();

        for number in &wave.task_numbers {
            let Some(task) = tasks_by_number.get(number.as_str()) else {
                continue;
            };

            if task.files.is_empty() {
                tracing::warn!(
                    task = %task.number,
                    name = %task.name,
                    wave = %wave.name,
                    "task declares no files; overlap validation cannot protect it"
                );
                continue;
            }

            for file in &task.files {
                let path = normalize_path(file);
                if path.is_empty() {
                    continue;
                }
                if let Some(first) = claimed.get(&path) {
                    return Err(SchedulerError::FileOverlap {
                        wave: wave.name.clone(),
                        path,
                        first: (*first).to_string(),
                        second: task.name.clone(),
                    });
                }
                claimed.insert(path, task.name.as_str());
            }
        }
    }

    Ok(())
}

/// Reject waves in which two tasks modify source files in the same package
/// (directory), unless one transitively depends on the other.
///
/// Only files whose extension appears in `source_extensions` participate.
pub fn validate_package_conflicts(
    waves: &[Wave],
    tasks: &[Task],
    source_extensions: &[String],
) -> Result<(), SchedulerError> {
    let tasks_by_number: HashMap<&str, &Task> =
        tasks.iter().map(|t| (t.number.as_str(), t)).collect();
    let deps = direct_dependencies(tasks);

    for wave in waves {
        // package dir -> (task number, task name) that claimed it.
        let mut claimed: HashMap<String, (&str, &str)> = HashMap::new();

        for number in &wave.task_numbers {
            let Some(task) = tasks_by_number.get(number.as_str()) else {
                continue;
            };

            let mut packages: HashSet<String> = HashSet::new();
            for file in &task.files {
                let path = normalize_path(file);
                if !has_source_extension(&path, source_extensions) {
                    continue;
                }
                packages.insert(package_of(&path));
            }

            for package in packages {
                if let Some((first_number, first_name)) = claimed.get(&package) {
                    let related = depends_transitively(&deps, number, first_number)
                        || depends_transitively(&deps, first_number, number);
                    if !related {
                        return Err(SchedulerError::PackageConflict {
                            wave: wave.name.clone(),
                            package,
                            first: (*first_name).to_string(),
                            second: task.name.clone(),
                        });
                    }
                } else {
                    claimed.insert(package, (task.number.as_str(), task.name.as_str()));
                }
            }
        }
    }

    Ok(())
}

/// Directory portion of a normalised path; empty for top-level files.
fn package_of(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

fn has_source_extension(path: &str, extensions: &[String]) -> bool {
    extensions.iter().any(|ext| path.ends_with(ext.as_str()))
}

/// Direct dependency map, cross-file references resolved to local numbers.
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

/// Whether `from` transitively depends on `to`.
fn depends_transitively(deps: &HashMap<String, Vec<String>>, from: &str, to: &str) -> bool {
    let mut stack: Vec<&str> = vec![from];
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
