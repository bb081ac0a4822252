//! Configuration file management for conductor.
//!
//! Provides a TOML config file at `~/.config/conductor/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use conductor_core::hooks::{ArchitectureMode, RollbackMode};
use conductor_core::monitor::MonitorConfig;
use conductor_core::qc::QcMode;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub qc: QcSection,
    #[serde(default)]
    pub rollback: RollbackSection,
    #[serde(default)]
    pub branch_guard: BranchGuardSection,
    #[serde(default)]
    pub architecture: ArchitectureSection,
    #[serde(default)]
    pub anomaly: AnomalySection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Shell command used to invoke the implementing agent.
    pub command: String,
    /// Shell command used for QC reviews.
    pub qc_command: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: "claude -p".to_string(),
            qc_command: "claude -p".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QcSection {
    /// Agent-selection mode: "", "explicit", "auto", or "mixed".
    pub mode: String,
    /// Named QC agents; more than one enables multi-agent review.
    pub agents: Vec<String>,
    pub max_retries: u32,
}

impl Default for QcSection {
    fn default() -> Self {
        Self {
            mode: String::new(),
            agents: vec!["qc".to_string()],
            max_retries: 2,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackSection {
    pub enabled: bool,
    /// "manual", "auto_on_red", or "auto_on_max_retries".
    pub mode: String,
    pub keep_checkpoint_days: i64,
    /// Checkpoint branch prefix; empty means the built-in default.
    pub checkpoint_prefix: String,
}

impl Default for RollbackSection {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: "manual".to_string(),
            keep_checkpoint_days: 7,
            checkpoint_prefix: String::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchGuardSection {
    pub enabled: bool,
    pub require_clean_state: bool,
    pub protected_branches: Vec<String>,
}

impl Default for BranchGuardSection {
    fn default() -> Self {
        Self {
            enabled: true,
            require_clean_state: false,
            protected_branches: vec!["main".to_string(), "master".to_string()],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitectureSection {
    /// "block", "escalate", or "off".
    pub mode: String,
    pub confidence_threshold: f64,
}

impl Default for ArchitectureSection {
    fn default() -> Self {
        Self {
            mode: "off".to_string(),
            confidence_threshold: 0.5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalySection {
    pub consecutive_failure_threshold: u32,
    pub error_rate_threshold: f64,
    pub duration_deviation_threshold: f64,
}

impl Default for AnomalySection {
    fn default() -> Self {
        let defaults = MonitorConfig::default();
        Self {
            consecutive_failure_threshold: defaults.consecutive_failure_threshold,
            error_rate_threshold: defaults.error_rate_threshold,
            duration_deviation_threshold: defaults.duration_deviation_threshold,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the conductor config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/conductor` or
/// `~/.config/conductor`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("conductor");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("conductor")
}

/// Return the path to the conductor config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / resolve
// -----------------------------------------------------------------------

/// Load the config file from an explicit path, the `CONDUCTOR_CONFIG` env
/// var, or the default location. A missing file yields defaults.
pub fn load_config(explicit: Option<&PathBuf>) -> Result<ConfigFile> {
    let path = explicit
        .cloned()
        .or_else(|| std::env::var("CONDUCTOR_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(config_path);

    if !path.exists() {
        if explicit.is_some() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        return Ok(ConfigFile::default());
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile =
        toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for wiring the engine.
#[derive(Debug)]
pub struct ConductorConfig {
    pub agent_command: String,
    pub qc_command: String,
    pub qc_agents: Vec<String>,
    pub qc_mode: QcMode,
    pub max_retries: u32,
    pub rollback_enabled: bool,
    pub rollback_mode: RollbackMode,
    pub keep_checkpoint_days: i64,
    pub checkpoint_prefix: Option<String>,
    pub branch_guard_enabled: bool,
    pub require_clean_state: bool,
    pub protected_branches: Vec<String>,
    pub architecture_mode: ArchitectureMode,
    pub confidence_threshold: f64,
    pub monitor: MonitorConfig,
}

impl ConductorConfig {
    /// Resolve the raw config file into typed engine settings.
    pub fn resolve(file: ConfigFile) -> Result<Self> {
        let qc_mode = QcMode::from_str(&file.qc.mode)
            .map_err(|e| anyhow::anyhow!("invalid [qc].mode: {e}"))?;
        let rollback_mode = RollbackMode::from_str(&file.rollback.mode)
            .map_err(|e| anyhow::anyhow!("invalid [rollback].mode: {e}"))?;
        let architecture_mode = ArchitectureMode::from_str(&file.architecture.mode)
            .map_err(|e| anyhow::anyhow!("invalid [architecture].mode: {e}"))?;

        let checkpoint_prefix = if file.rollback.checkpoint_prefix.is_empty() {
            None
        } else {
            Some(file.rollback.checkpoint_prefix)
        };

        let mut qc_agents = file.qc.agents;
        if qc_agents.is_empty() {
            qc_agents.push("qc".to_string());
        }

        Ok(Self {
            agent_command: file.agent.command,
            qc_command: file.agent.qc_command,
            qc_agents,
            qc_mode,
            max_retries: file.qc.max_retries,
            rollback_enabled: file.rollback.enabled,
            rollback_mode,
            keep_checkpoint_days: file.rollback.keep_checkpoint_days,
            checkpoint_prefix,
            branch_guard_enabled: file.branch_guard.enabled,
            require_clean_state: file.branch_guard.require_clean_state,
            protected_branches: file.branch_guard.protected_branches,
            architecture_mode,
            confidence_threshold: file.architecture.confidence_threshold,
            monitor: MonitorConfig {
                consecutive_failure_threshold: file.anomaly.consecutive_failure_threshold,
                error_rate_threshold: file.anomaly.error_rate_threshold,
                duration_deviation_threshold: file.anomaly.duration_deviation_threshold,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve() {
        let config = ConductorConfig::resolve(ConfigFile::default()).unwrap();
        assert_eq!(config.qc_mode, QcMode::Single);
        assert_eq!(config.rollback_mode, RollbackMode::Manual);
        assert_eq!(config.architecture_mode, ArchitectureMode::Off);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.keep_checkpoint_days, 7);
        assert!(config.checkpoint_prefix.is_none());
        assert_eq!(config.qc_agents, vec!["qc"]);
    }

    #[test]
    fn toml_round_trip_with_overrides() {
        let toml_src = r#"
            [qc]
            mode = "mixed"
            agents = ["reviewer-a", "reviewer-b"]
            max_retries = 4

            [rollback]
            enabled = true
            mode = "auto_on_red"
            keep_checkpoint_days = 3
            checkpoint_prefix = "team-checkpoint-"

            [branch_guard]
            enabled = true
            require_clean_state = true
            protected_branches = ["release"]

            [architecture]
            mode = "escalate"
            confidence_threshold = 0.7

            [anomaly]
            consecutive_failure_threshold = 5
            error_rate_threshold = 0.8
            duration_deviation_threshold = 3.0
        "#;
        let file: ConfigFile = toml::from_str(toml_src).unwrap();
        let config = ConductorConfig::resolve(file).unwrap();

        assert_eq!(config.qc_mode, QcMode::Mixed);
        assert_eq!(config.qc_agents.len(), 2);
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.rollback_mode, RollbackMode::AutoOnRed);
        assert_eq!(config.keep_checkpoint_days, 3);
        assert_eq!(config.checkpoint_prefix.as_deref(), Some("team-checkpoint-"));
        assert!(config.require_clean_state);
        assert_eq!(config.protected_branches, vec!["release"]);
        assert_eq!(config.architecture_mode, ArchitectureMode::Escalate);
        assert_eq!(config.monitor.consecutive_failure_threshold, 5);
    }

    #[test]
    fn invalid_mode_is_rejected() {
        let file = ConfigFile {
            rollback: RollbackSection {
                mode: "always".to_string(),
                ..RollbackSection::default()
            },
            ..ConfigFile::default()
        };
        assert!(ConductorConfig::resolve(file).is_err());
    }
}
