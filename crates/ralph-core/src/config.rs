//! `.ralph-tui/config.{toml,yaml,yml}` loading.
//!
//! Recognized keys mirror the orchestrator's configuration surface:
//! `agent`, `command`, `maxIterations`, `iterationDelay`, `autoCommit`,
//! `tracker`, `trackerOptions`, `parallel`, `worktree`, `errorHandling`,
//! `conflictResolution`, `agentOptions`, `sandbox`. The sandbox block is
//! accepted and carried but otherwise inert here: the sandbox wrapper itself
//! is an external collaborator.

use ralph_proto::{ErrorHandlingPolicy, ErrorStrategy};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("unrecognized config extension: {0}")]
    UnknownExtension(String),
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unknown tracker kind: {0}")]
    UnknownTracker(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackerKind {
    Json,
    Beads,
    BeadsRust,
    BeadsBv,
}

impl std::str::FromStr for TrackerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "beads" => Ok(Self::Beads),
            "beads-rust" => Ok(Self::BeadsRust),
            "beads-bv" => Ok(Self::BeadsBv),
            other => Err(ConfigError::UnknownTracker(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolutionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_conflict_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_files")]
    pub max_files: u32,
}

fn default_true() -> bool {
    true
}
fn default_confidence_threshold() -> f64 {
    0.7
}
fn default_conflict_timeout_ms() -> u64 {
    120_000
}
fn default_max_files() -> u32 {
    10
}

impl Default for ConflictResolutionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: default_confidence_threshold(),
            timeout_ms: default_conflict_timeout_ms(),
            max_files: default_max_files(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub env_exclude: Vec<String>,
    #[serde(default)]
    pub env_passthrough: Vec<String>,
    #[serde(default)]
    pub default_flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sandbox_mode")]
    pub mode: String,
    #[serde(default)]
    pub allow_paths: Vec<String>,
    #[serde(default)]
    pub read_only_paths: Vec<String>,
    #[serde(default)]
    pub network: bool,
}

fn default_sandbox_mode() -> String {
    "auto".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: default_sandbox_mode(),
            allow_paths: Vec::new(),
            read_only_paths: Vec::new(),
            network: false,
        }
    }
}

/// Top-level Ralph-TUI configuration, loaded from `.ralph-tui/config.{toml,yaml,yml}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RalphConfig {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub iteration_delay: u64,
    #[serde(default = "default_true")]
    pub auto_commit: bool,
    #[serde(default = "default_tracker")]
    pub tracker: String,
    #[serde(default)]
    pub tracker_options: TrackerOptions,
    #[serde(default = "default_parallel")]
    pub parallel: u32,
    #[serde(default)]
    pub worktree: bool,
    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,
    #[serde(default)]
    pub conflict_resolution: ConflictResolutionConfig,
    #[serde(default)]
    pub agent_options: AgentOptions,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

fn default_config_version() -> u32 {
    1
}
fn default_max_iterations() -> u32 {
    100
}
fn default_tracker() -> String {
    "json".to_string()
}
fn default_parallel() -> u32 {
    1
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            agent: None,
            command: None,
            max_iterations: default_max_iterations(),
            iteration_delay: 0,
            auto_commit: true,
            tracker: default_tracker(),
            tracker_options: TrackerOptions::default(),
            parallel: default_parallel(),
            worktree: false,
            error_handling: ErrorHandlingConfig::default(),
            conflict_resolution: ConflictResolutionConfig::default(),
            agent_options: AgentOptions::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHandlingConfig {
    #[serde(default = "default_strategy")]
    pub strategy: ErrorStrategy,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub continue_on_non_zero_exit: bool,
}

fn default_strategy() -> ErrorStrategy {
    ErrorStrategy::Retry
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    2_000
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            continue_on_non_zero_exit: false,
        }
    }
}

impl From<ErrorHandlingConfig> for ErrorHandlingPolicy {
    fn from(cfg: ErrorHandlingConfig) -> Self {
        Self {
            strategy: cfg.strategy,
            max_retries: cfg.max_retries,
            retry_delay_ms: cfg.retry_delay_ms,
            continue_on_non_zero_exit: cfg.continue_on_non_zero_exit,
        }
    }
}

impl RalphConfig {
    /// Loads config from a path, dispatching on extension (`toml`, `yaml`, `yml`).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, path.extension().and_then(|e| e.to_str()).unwrap_or(""))
    }

    pub fn parse(content: &str, extension: &str) -> Result<Self, ConfigError> {
        match extension {
            "toml" => Ok(toml::from_str(content)?),
            "yaml" | "yml" => Ok(serde_yaml::from_str(content)?),
            other => Err(ConfigError::UnknownExtension(other.to_string())),
        }
    }

    pub fn tracker_kind(&self) -> Result<TrackerKind, ConfigError> {
        self.tracker.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RalphConfig::default();
        assert_eq!(cfg.max_iterations, 100);
        assert_eq!(cfg.parallel, 1);
        assert!(cfg.auto_commit);
        assert_eq!(cfg.tracker, "json");
        assert!(cfg.conflict_resolution.enabled);
        assert!((cfg.conflict_resolution.confidence_threshold - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn parses_toml() {
        let toml_src = r#"
            agent = "claude"
            maxIterations = 50
            parallel = 3

            [trackerOptions]
            path = "PRD.json"
        "#;
        let cfg = RalphConfig::parse(toml_src, "toml").unwrap();
        assert_eq!(cfg.agent.as_deref(), Some("claude"));
        assert_eq!(cfg.max_iterations, 50);
        assert_eq!(cfg.parallel, 3);
        assert_eq!(cfg.tracker_options.path.as_deref(), Some("PRD.json"));
    }

    #[test]
    fn parses_yaml() {
        let yaml_src = r"
agent: claude
tracker: beads
trackerOptions:
  epicId: EPIC-1
errorHandling:
  strategy: abort
  maxRetries: 5
";
        let cfg = RalphConfig::parse(yaml_src, "yaml").unwrap();
        assert_eq!(cfg.tracker, "beads");
        assert_eq!(cfg.tracker_options.epic_id.as_deref(), Some("EPIC-1"));
        assert_eq!(cfg.error_handling.strategy, ErrorStrategy::Abort);
        assert_eq!(cfg.error_handling.max_retries, 5);
    }

    #[test]
    fn parses_yml_extension_same_as_yaml() {
        let yaml_src = "agent: gemini\n";
        let cfg = RalphConfig::parse(yaml_src, "yml").unwrap();
        assert_eq!(cfg.agent.as_deref(), Some("gemini"));
    }

    #[test]
    fn unknown_extension_is_an_error() {
        let err = RalphConfig::parse("agent: claude", "ini").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownExtension(_)));
    }

    #[test]
    fn tracker_kind_rejects_unknown_values() {
        let mut cfg = RalphConfig::default();
        cfg.tracker = "carrier-pigeon".to_string();
        assert!(matches!(
            cfg.tracker_kind(),
            Err(ConfigError::UnknownTracker(_))
        ));
    }

    #[test]
    fn tracker_kind_accepts_all_four_variants() {
        for (name, expected) in [
            ("json", TrackerKind::Json),
            ("beads", TrackerKind::Beads),
            ("beads-rust", TrackerKind::BeadsRust),
            ("beads-bv", TrackerKind::BeadsBv),
        ] {
            let mut cfg = RalphConfig::default();
            cfg.tracker = name.to_string();
            assert_eq!(cfg.tracker_kind().unwrap(), expected);
        }
    }
}
