//! `conductor waves` and `conductor validate`: schedule a plan without
//! executing anything.

use std::path::PathBuf;

use anyhow::Result;

use conductor_core::schedule::{calculate_waves_with, validate_registry_prerequisites, WaveOptions};

use crate::exit_codes;
use crate::plan_file;

/// Print the wave layout for a plan. Returns the process exit code.
pub fn waves(plan_path: &PathBuf) -> Result<i32> {
    let plan = plan_file::load_plan(plan_path)?;
    let mut options = WaveOptions::default();
    options.max_concurrency = plan.max_concurrency.clone();

    let waves = match calculate_waves_with(&plan.tasks, &options) {
        Ok(waves) => waves,
        Err(e) => {
            eprintln!("scheduling error: {e}");
            return Ok(exit_codes::SCHEDULING_ERROR);
        }
    };

    println!("plan {}: {} tasks, {} waves", plan.name, plan.tasks.len(), waves.len());
    for wave in &waves {
        println!(
            "{} (max {} concurrent): {}",
            wave.name,
            wave.max_concurrency,
            wave.task_numbers.join(", ")
        );
        for (group, members) in &wave.group_info {
            println!("  group {group}: {}", members.join(", "));
        }
    }

    Ok(exit_codes::ALL_GREEN)
}

/// Validate a plan (scheduling plus registry prerequisites). Returns the
/// process exit code.
pub fn validate(plan_path: &PathBuf) -> Result<i32> {
    let plan = plan_file::load_plan(plan_path)?;
    let mut options = WaveOptions::default();
    options.max_concurrency = plan.max_concurrency.clone();

    if let Err(e) = calculate_waves_with(&plan.tasks, &options) {
        eprintln!("scheduling error: {e}");
        return Ok(exit_codes::SCHEDULING_ERROR);
    }
    if let Err(e) = validate_registry_prerequisites(&plan.tasks, plan.registry.as_ref()) {
        eprintln!("scheduling error: {e}");
        return Ok(exit_codes::SCHEDULING_ERROR);
    }

    println!("plan {} is valid", plan.name);
    Ok(exit_codes::ALL_GREEN)
}
