//! Wave partitioning: level-based topological grouping of the dependency
//! DAG, followed by per-wave safety validation.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::model::{Task, Wave};

use super::conflicts::{validate_file_overlaps, validate_package_conflicts};
use super::graph::{build_dependency_graph, detect_cycle, parse_dependency_ref, validate_tasks};
use super::{compare_task_numbers, SchedulerError};

/// Tuning knobs for wave computation.
#[derive(Debug, Clone)]
pub struct WaveOptions {
    /// Per-wave concurrency overrides, keyed by wave name ("Wave 1", ...).
    pub max_concurrency: HashMap<String, usize>,
    /// File extensions that count as source code for package-conflict
    /// validation.
    pub source_extensions: Vec<String>,
}

impl Default for WaveOptions {
    fn default() -> Self {
        Self {
            max_concurrency: HashMap::new(),
            source_extensions: vec![".go".to_string()],
        }
    }
}

/// Compute the execution waves for a task set with default options.
pub fn calculate_waves(tasks: &[Task]) -> Result<Vec<Wave>, SchedulerError> {
    calculate_waves_with(tasks, &WaveOptions::default())
}

/// Compute the execution waves for a task set.
///
/// 1. Validate the task set and reject dependency cycles.
/// 2. Assign each task a level: 1 for roots, otherwise 1 + the maximum
///    level among its dependencies.
/// 3. Wave *k* holds all level-*k* tasks, numeric-parseable numbers first
///    (ascending), then the rest lexicographically.
/// 4. Each wave's concurrency defaults to its size unless overridden.
/// 5. Validate file overlaps and package conflicts within every wave.
pub fn calculate_waves_with(
    tasks: &[Task],
    options: &WaveOptions,
) -> Result<Vec<Wave>, SchedulerError> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }

    validate_tasks(tasks)?;
    let graph = build_dependency_graph(tasks);

    if let Some(cycle) = detect_cycle(&graph) {
        return Err(SchedulerError::CycleDetected(cycle.join(", ")));
    }

    let levels = compute_levels(tasks);
    let max_level = levels.values().copied().max().unwrap_or(0);

    let tasks_by_number: HashMap<&str, &Task> =
        tasks.iter().map(|t| (t.number.as_str(), t)).collect();

    let mut waves = Vec::with_capacity(max_level);
    for level in 1..=max_level {
        let mut numbers: Vec<String> = levels
            .iter()
            .filter(|(_, l)| **l == level)
            .map(|(n, _)| n.clone())
            .collect();
        numbers.sort_by(|a, b| compare_task_numbers(a, b));

        let mut group_info: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for number in &numbers {
            if let Some(group) = tasks_by_number
                .get(number.as_str())
                .and_then(|t| t.worktree_group.clone())
            {
                group_info.entry(group).or_default().push(number.clone());
            }
        }

        let name = format!("Wave {level}");
        let max_concurrency = options
            .max_concurrency
            .get(&name)
            .copied()
            .unwrap_or(numbers.len());

        waves.push(Wave {
            name,
            task_numbers: numbers,
            max_concurrency,
            group_info,
        });
    }

    validate_file_overlaps(&waves, tasks)?;
    validate_package_conflicts(&waves, tasks, &options.source_extensions)?;

    Ok(waves)
}

/// Compute dependency levels by processing tasks in topological order.
fn compute_levels(tasks: &[Task]) -> HashMap<String, usize> {
    // Direct dependencies, resolved to local task numbers.
    let mut deps: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for task in tasks {
        deps.entry(task.number.as_str()).or_default();
        in_degree.entry(task.number.as_str()).or_insert(0);
    }
    for task in tasks {
        for dep in &task.depends_on {
            let target = parse_dependency_ref(dep).target();
            if !deps.contains_key(target) {
                continue;
            }
            deps.get_mut(task.number.as_str())
                .expect("task entry exists")
                .push(target);
            dependents.entry(target).or_default().push(task.number.as_str());
            *in_degree.get_mut(task.number.as_str()).expect("task entry") += 1;
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(n, _)| *n)
        .collect();

    let mut levels: HashMap<String, usize> = HashMap::new();
    while let Some(number) = queue.pop_front() {
        let level = deps[number]
            .iter()
            .map(|dep| levels.get(*dep).copied().unwrap_or(0))
            .max()
            .unwrap_or(0)
            + 1;
        levels.insert(number.to_string(), level);

        if let Some(children) = dependents.get(number) {
            for child in children {
                let deg = in_degree.get_mut(child).expect("child entry");
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(number: &str, deps: &[&str]) -> Task {
        Task {
            number: number.to_string(),
            name: format!("Task {number}"),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            ..Task::default()
        }
    }

    #[test]
    fn diamond_partitions_into_three_waves() {
        let tasks = vec![
            task("1", &[]),
            task("2", &["1"]),
            task("3", &["1"]),
            task("4", &["2", "3"]),
        ];
        let waves = calculate_waves(&tasks).expect("diamond is acyclic");

        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0].task_numbers, vec!["1"]);
        assert_eq!(waves[1].task_numbers, vec!["2", "3"]);
        assert_eq!(waves[2].task_numbers, vec!["4"]);
        assert_eq!(waves[0].name, "Wave 1");
        assert_eq!(waves[1].name, "Wave 2");
        assert_eq!(waves[2].name, "Wave 3");
    }

    #[test]
    fn empty_task_list_yields_zero_waves() {
        let waves = calculate_waves(&[]).expect("empty plan is valid");
        assert!(waves.is_empty());
    }

    #[test]
    fn independent_tasks_form_one_wave() {
        let tasks = vec![task("3", &[]), task("1", &[]), task("2", &[])];
        let waves = calculate_waves(&tasks).unwrap();
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].task_numbers, vec!["1", "2", "3"]);
    }

    #[test]
    fn cycle_rejected() {
        let tasks = vec![task("1", &["2"]), task("2", &["1"])];
        let err = calculate_waves(&tasks).unwrap_err();
        assert!(matches!(err, SchedulerError::CycleDetected(_)));
    }

    #[test]
    fn self_dependency_rejected_as_cycle() {
        let tasks = vec![task("1", &["1"])];
        assert!(matches!(
            calculate_waves(&tasks),
            Err(SchedulerError::CycleDetected(_))
        ));
    }

    #[test]
    fn numeric_sort_precedes_lexicographic() {
        let tasks = vec![
            task("10", &[]),
            task("alpha", &[]),
            task("2", &[]),
            task("beta", &[]),
        ];
        let waves = calculate_waves(&tasks).unwrap();
        assert_eq!(waves[0].task_numbers, vec!["2", "10", "alpha", "beta"]);
    }

    #[test]
    fn max_concurrency_defaults_to_wave_size() {
        let tasks = vec![task("1", &[]), task("2", &[]), task("3", &[])];
        let waves = calculate_waves(&tasks).unwrap();
        assert_eq!(waves[0].max_concurrency, 3);
    }

    #[test]
    fn max_concurrency_override_applies() {
        let tasks = vec![task("1", &[]), task("2", &[]), task("3", &[])];
        let mut options = WaveOptions::default();
        options.max_concurrency.insert("Wave 1".to_string(), 1);

        let waves = calculate_waves_with(&tasks, &options).unwrap();
        assert_eq!(waves[0].max_concurrency, 1);
    }

    #[test]
    fn group_info_collects_members() {
        let mut a = task("1", &[]);
        a.worktree_group = Some("api".to_string());
        let mut b = task("2", &[]);
        b.worktree_group = Some("api".to_string());
        let c = task("3", &[]);

        let waves = calculate_waves(&[a, b, c]).unwrap();
        assert_eq!(waves[0].group_info["api"], vec!["1", "2"]);
        assert_eq!(waves[0].group_info.len(), 1);
    }

    #[test]
    fn waves_are_a_topological_sort() {
        let tasks = vec![
            task("1", &[]),
            task("2", &["1"]),
            task("3", &["2"]),
            task("4", &["1"]),
            task("5", &["3", "4"]),
        ];
        let waves = calculate_waves(&tasks).unwrap();

        // Position of each task in the flattened wave order.
        let mut position = HashMap::new();
        for (i, number) in waves
            .iter()
            .flat_map(|w| w.task_numbers.iter())
            .enumerate()
        {
            position.insert(number.clone(), i);
        }
        for t in &tasks {
            for dep in &t.depends_on {
                assert!(
                    position[dep] < position[&t.number],
                    "dependency {dep} must precede {}",
                    t.number
                );
            }
        }
    }

    #[test]
    fn every_later_wave_task_has_an_earlier_wave_dependency() {
        let tasks = vec![
            task("1", &[]),
            task("2", &["1"]),
            task("3", &["1"]),
            task("4", &["2", "3"]),
        ];
        let waves = calculate_waves(&tasks).unwrap();
        let tasks_by_number: HashMap<&str, &Task> =
            tasks.iter().map(|t| (t.number.as_str(), t)).collect();

        for (i, wave) in waves.iter().enumerate().skip(1) {
            let earlier: Vec<&String> = waves[..i]
                .iter()
                .flat_map(|w| w.task_numbers.iter())
                .collect();
            for number in &wave.task_numbers {
                let t = tasks_by_number[number.as_str()];
                assert!(
                    t.depends_on
                        .iter()
                        .any(|d| earlier.iter().any(|e| *e == d)),
                    "task {number} in a later wave must depend on an earlier wave"
                );
            }
        }
    }
}
