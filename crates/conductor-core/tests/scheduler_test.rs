//! End-to-end scheduler scenarios: wave shapes, cycle rejection, overlap
//! validation, and wave idempotence.

use std::collections::HashMap;

use conductor_core::model::Task;
use conductor_core::schedule::{
    build_dependency_graph, calculate_waves, SchedulerError,
};

fn task(number: &str, deps: &[&str], files: &[&str]) -> Task {
    Task {
        number: number.to_string(),
        name: format!("Task {number}"),
        depends_on: deps.iter().map(|s| s.to_string()).collect(),
        files: files.iter().map(|s| s.to_string()).collect(),
        ..Task::default()
    }
}

#[test]
fn diamond_plan_schedules_into_three_waves() {
    let tasks = vec![
        task("1", &[], &["a.txt"]),
        task("2", &["1"], &["b.txt"]),
        task("3", &["1"], &["c.txt"]),
        task("4", &["2", "3"], &["d.txt"]),
    ];

    let waves = calculate_waves(&tasks).expect("diamond schedules");
    let shape: Vec<Vec<String>> = waves.iter().map(|w| w.task_numbers.clone()).collect();
    assert_eq!(
        shape,
        vec![
            vec!["1".to_string()],
            vec!["2".to_string(), "3".to_string()],
            vec!["4".to_string()],
        ]
    );
}

#[test]
fn mutual_dependency_fails_with_cycle() {
    let tasks = vec![task("1", &["2"], &[]), task("2", &["1"], &[])];
    let err = calculate_waves(&tasks).expect_err("cycle must be rejected");
    assert!(matches!(err, SchedulerError::CycleDetected(_)));
    assert!(err.to_string().contains("cycle"));
}

#[test]
fn file_overlap_error_names_wave_path_and_tasks() {
    let tasks = vec![
        task("1", &[], &["shared/file.go"]),
        task("2", &[], &["shared/file.go"]),
    ];

    let err = calculate_waves(&tasks).expect_err("overlap must be rejected");
    let msg = err.to_string();
    assert!(msg.contains("Wave 1"));
    assert!(msg.contains("shared/file.go"));
    assert!(msg.contains("Task 1"));
    assert!(msg.contains("Task 2"));
    assert!(msg.contains("Move the conflicting tasks"));
}

#[test]
fn package_conflict_within_a_wave_is_rejected() {
    let tasks = vec![
        task("1", &[], &["pkg/auth/login.go"]),
        task("2", &[], &["pkg/auth/session.go"]),
    ];
    let err = calculate_waves(&tasks).expect_err("package conflict must be rejected");
    assert!(matches!(err, SchedulerError::PackageConflict { .. }));
}

#[test]
fn package_shared_across_waves_is_fine() {
    let tasks = vec![
        task("1", &[], &["pkg/auth/login.go"]),
        task("2", &["1"], &["pkg/auth/session.go"]),
    ];
    let waves = calculate_waves(&tasks).expect("dependent tasks land in separate waves");
    assert_eq!(waves.len(), 2);
}

#[test]
fn cross_file_dependencies_schedule_against_the_combined_set() {
    let mut remote = task("7", &[], &["remote.txt"]);
    remote.source_file = "plans/other.md".to_string();
    let tasks = vec![task("1", &["file:plans/other.md:task:7"], &["local.txt"]), remote];

    let waves = calculate_waves(&tasks).expect("cross-file dependency resolves");
    assert_eq!(waves.len(), 2);
    assert_eq!(waves[0].task_numbers, vec!["7"]);
    assert_eq!(waves[1].task_numbers, vec!["1"]);
}

#[test]
fn unknown_cross_file_target_fails_validation() {
    let tasks = vec![task("1", &["file:plans/missing.md:task:99"], &[])];
    let err = calculate_waves(&tasks).expect_err("unknown target must fail");
    assert!(err.to_string().contains("non-existent"));
}

#[test]
fn recomputing_waves_is_idempotent() {
    let tasks = vec![
        task("1", &[], &["a.txt"]),
        task("2", &["1"], &["b.txt"]),
        task("3", &["1"], &["c.txt"]),
        task("4", &["2", "3"], &["d.txt"]),
        task("5", &["4"], &["e.txt"]),
    ];

    let first = calculate_waves(&tasks).unwrap();
    let second = calculate_waves(&tasks).unwrap();
    assert_eq!(first, second);
}

#[test]
fn in_degrees_inside_each_wave_are_zero_among_wave_members() {
    // Tasks inside a wave form an antichain: no edges among them.
    let tasks = vec![
        task("1", &[], &[]),
        task("2", &["1"], &[]),
        task("3", &["1"], &[]),
        task("4", &["2", "3"], &[]),
        task("5", &["1"], &[]),
    ];
    let waves = calculate_waves(&tasks).unwrap();
    let graph = build_dependency_graph(&tasks);

    for wave in &waves {
        let members: Vec<&str> = wave.task_numbers.iter().map(String::as_str).collect();
        for member in &members {
            if let Some(dependents) = graph.edges.get(*member) {
                for dependent in dependents {
                    assert!(
                        !members.contains(&dependent.as_str()),
                        "edge {member} -> {dependent} inside {}",
                        wave.name
                    );
                }
            }
        }
    }
}

#[test]
fn large_plan_levels_match_longest_dependency_chains() {
    // A chain of five plus independent stragglers.
    let mut tasks = vec![
        task("1", &[], &[]),
        task("2", &["1"], &[]),
        task("3", &["2"], &[]),
        task("4", &["3"], &[]),
        task("5", &["4"], &[]),
    ];
    tasks.push(task("10", &[], &[]));
    tasks.push(task("11", &["1"], &[]));

    let waves = calculate_waves(&tasks).unwrap();
    assert_eq!(waves.len(), 5);

    let mut level_of: HashMap<&str, usize> = HashMap::new();
    for (i, wave) in waves.iter().enumerate() {
        for number in &wave.task_numbers {
            level_of.insert(number.as_str(), i + 1);
        }
    }
    assert_eq!(level_of["1"], 1);
    assert_eq!(level_of["10"], 1);
    assert_eq!(level_of["11"], 2);
    assert_eq!(level_of["5"], 5);
}
