//! Plan-document loading.
//!
//! The CLI consumes plans as serialized JSON documents of the engine's data
//! model. Authoring front-ends (Markdown/YAML plan formats) are external:
//! whatever produces the document owns its syntax; conductor owns its
//! semantics.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use conductor_core::model::Task;
use conductor_core::schedule::SymbolRegistry;

/// A complete plan as loaded from disk.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PlanDocument {
    /// Plan name, used for branch naming and logs.
    #[serde(default)]
    pub name: String,
    pub tasks: Vec<Task>,
    /// Optional cross-task symbol registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<SymbolRegistry>,
    /// Per-wave concurrency overrides, keyed by wave name.
    #[serde(default)]
    pub max_concurrency: HashMap<String, usize>,
}

/// Load and normalise a plan document.
///
/// Tasks that do not carry a `source_file` inherit the document path, so
/// execution history is keyed consistently.
pub fn load_plan(path: &Path) -> Result<PlanDocument> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plan file {}", path.display()))?;
    let mut plan: PlanDocument = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse plan file {}", path.display()))?;

    if plan.name.is_empty() {
        plan.name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("plan")
            .to_string();
    }

    let path_str = path.to_string_lossy().into_owned();
    for task in &mut plan.tasks {
        if task.source_file.is_empty() {
            task.source_file = path_str.clone();
        }
    }

    Ok(plan)
}
