//! `conductor run`: schedule a plan and execute it to completion.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use conductor_core::command::ShellRunner;
use conductor_core::driver::{status_line, DriverError, PlanDriver};
use conductor_core::executor::TaskExecutor;
use conductor_core::git::GitCheckpointer;
use conductor_core::hooks::{
    ArchitectureCheckpointHook, ArchitectureMode, BranchGuard, BranchGuardConfig, RollbackConfig,
    RollbackHook,
};
use conductor_core::invoke::{ProcessInvoker, ProcessQcAgent, QcAgent};
use conductor_core::monitor::AnomalyMonitor;
use conductor_core::qc::{QcConfig, QualityController};
use conductor_core::store::MemoryStore;

use crate::config::ConductorConfig;
use crate::exit_codes;
use crate::plan_file;

pub struct RunArgs {
    pub plan_path: PathBuf,
    pub working_dir: PathBuf,
    pub max_retries: Option<u32>,
    pub agent_command: Option<String>,
}

/// Execute a plan. Returns the process exit code.
pub async fn run(args: RunArgs, config: ConductorConfig, cancel: CancellationToken) -> Result<i32> {
    let plan = plan_file::load_plan(&args.plan_path)?;
    tracing::info!(plan = %plan.name, tasks = plan.tasks.len(), "loaded plan");

    let max_retries = args.max_retries.unwrap_or(config.max_retries);
    let agent_command = args
        .agent_command
        .clone()
        .unwrap_or_else(|| config.agent_command.clone());

    // Shared process/git plumbing, rooted in the working directory.
    let runner = Arc::new(ShellRunner::new(&args.working_dir));
    let checkpointer = Arc::new(GitCheckpointer::new(
        runner.clone(),
        config.checkpoint_prefix.clone(),
    ));

    // Agents.
    let invoker = Arc::new(ProcessInvoker::new(agent_command, &args.working_dir));
    let qc_agents: Vec<Arc<dyn QcAgent>> = config
        .qc_agents
        .iter()
        .map(|name| {
            Arc::new(ProcessQcAgent::new(
                name.clone(),
                config.qc_command.clone(),
                &args.working_dir,
            )) as Arc<dyn QcAgent>
        })
        .collect();

    // History store. In-process by default; a persistent backend plugs in
    // through the same trait.
    let store = Arc::new(MemoryStore::new());

    let qc = Arc::new(
        QualityController::new(
            qc_agents,
            QcConfig {
                mode: config.qc_mode,
                max_retries,
            },
        )
        .with_store(store.clone()),
    );

    let rollback = Arc::new(RollbackHook::new(
        Some(checkpointer.clone()),
        RollbackConfig {
            enabled: config.rollback_enabled,
            mode: config.rollback_mode,
            keep_checkpoint_days: config.keep_checkpoint_days,
        },
    ));

    let mut executor = TaskExecutor::new(invoker, runner.clone(), qc)
        .with_rollback(rollback)
        .with_store(store);

    if config.architecture_mode != ArchitectureMode::Off {
        // The concrete assessor is an external collaborator; without one
        // the hook assesses nothing but the wiring stays uniform.
        executor = executor.with_architecture(Arc::new(ArchitectureCheckpointHook::new(
            None,
            config.architecture_mode,
            config.confidence_threshold,
        )));
    }

    let monitor = Arc::new(AnomalyMonitor::new(config.monitor.clone()));
    let mut driver = PlanDriver::new(Arc::new(executor), monitor, plan.name.clone());

    if config.branch_guard_enabled {
        driver = driver.with_branch_guard(Arc::new(BranchGuard::new(
            checkpointer,
            runner,
            BranchGuardConfig {
                enabled: true,
                require_clean_state: config.require_clean_state,
                protected_branches: config.protected_branches.clone(),
            },
        )));
    }

    let mut wave_options = conductor_core::schedule::WaveOptions::default();
    wave_options.max_concurrency = plan.max_concurrency.clone();
    let driver = driver.with_wave_options(wave_options);

    let report = match driver.run(&cancel, &plan.tasks, plan.registry.as_ref()).await {
        Ok(report) => report,
        Err(DriverError::Scheduling(e)) => {
            eprintln!("scheduling error: {e}");
            return Ok(exit_codes::SCHEDULING_ERROR);
        }
        Err(DriverError::BranchGuard(e)) => {
            eprintln!("branch guard refused to start the plan: {e}");
            return Ok(exit_codes::EXTERNAL_FAILURE);
        }
    };

    // Per-task status lines and wave summaries.
    let total = plan.tasks.len();
    for result in &report.results {
        println!("{}", status_line(result, total));
    }
    for wave in &report.waves {
        println!(
            "{}: {} green, {} yellow, {} red, {} failed",
            wave.name, wave.green, wave.yellow, wave.red, wave.failed
        );
        for anomaly in &wave.anomalies {
            println!("  anomaly [{}/{}]: {}", anomaly.kind, anomaly.severity, anomaly.description);
        }
    }

    if report.cancelled {
        eprintln!("plan cancelled");
        return Ok(exit_codes::ANY_NON_GREEN);
    }

    if report.any_failure() || !report.all_green() {
        let failures = report.render_failures();
        if !failures.is_empty() {
            eprintln!("{failures}");
        }
        return Ok(exit_codes::ANY_NON_GREEN);
    }

    Ok(exit_codes::ALL_GREEN)
}
