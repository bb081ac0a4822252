//! conductor-core: a single-process orchestration engine for AI coding
//! agents.
//!
//! A declarative plan of tasks with dependencies is scheduled into waves,
//! each task is implemented by an external agent subprocess, the output is
//! reviewed by one or more QC agents against structured criteria, and git
//! checkpoints provide rollback around failures.
//!
//! Layering, bottom up:
//!
//! - [`command`]: the `sh -c` seam everything external goes through.
//! - [`git`], [`preflight`], [`classify`], [`verify`]: leaf services.
//! - [`schedule`]: pure wave scheduling and safety validation.
//! - [`qc`]: review prompts, response parsing, verdict aggregation.
//! - [`hooks`]: rollback, branch guard, architecture checkpoint.
//! - [`executor`]: the per-task state machine.
//! - [`driver`]: the wave loop.

pub mod classify;
pub mod command;
pub mod driver;
pub mod executor;
pub mod git;
pub mod hooks;
pub mod invoke;
pub mod model;
pub mod monitor;
pub mod preflight;
pub mod qc;
pub mod schedule;
pub mod store;
pub mod verify;
