//! Configuration loading and resolution
//!
//! Bootstrap configuration lives in a single TOML file. Every value has a
//! compiled default, so a missing file (or a missing table inside the file)
//! never prevents startup.
//!
//! # Resolution priority
//!
//! 1. Command-line argument (`--config`)
//! 2. Environment variable (`SPECFAB_CONFIG`)
//! 3. User config file (`~/.config/specfab/specfab.toml`)
//! 4. System config file (`/etc/specfab/specfab.toml`)
//! 5. Compiled defaults

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SPECFAB_CONFIG";

/// Config file name looked up in the platform config directories
pub const CONFIG_FILE_NAME: &str = "specfab.toml";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Field rule table (JSON) used when the CLI does not name one
    #[serde(default)]
    pub rules_path: Option<PathBuf>,

    /// Component database (JSON) used for component-reference fields
    #[serde(default)]
    pub components_path: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Round orchestrator tuning
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Per-source retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Default per-run budget
    #[serde(default)]
    pub budget: BudgetConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Orchestrator tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Simultaneous product runs in the worker pool
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Simultaneous source fetches within one round
    #[serde(default = "default_crawl_concurrency")]
    pub crawl_concurrency: usize,

    /// Maximum sources planned per round
    #[serde(default = "default_sources_per_round")]
    pub sources_per_round: usize,

    /// Per-round timeout in seconds
    #[serde(default = "default_round_timeout_secs")]
    pub round_timeout_secs: u64,

    /// Selected values below this confidence are re-planned
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Coverage target used by the early-stop condition
    #[serde(default = "default_coverage_target")]
    pub coverage_target: f64,

    /// Consecutive low-yield rounds before the run stops
    #[serde(default = "default_stale_round_limit")]
    pub stale_round_limit: u32,

    /// Newly filled fields a round must yield to not count as low-yield
    #[serde(default = "default_min_new_fields_per_round")]
    pub min_new_fields_per_round: usize,

    /// Pages below this identity confidence are dropped
    #[serde(default = "default_identity_min_confidence")]
    pub identity_min_confidence: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            crawl_concurrency: default_crawl_concurrency(),
            sources_per_round: default_sources_per_round(),
            round_timeout_secs: default_round_timeout_secs(),
            confidence_threshold: default_confidence_threshold(),
            coverage_target: default_coverage_target(),
            stale_round_limit: default_stale_round_limit(),
            min_new_fields_per_round: default_min_new_fields_per_round(),
            identity_min_confidence: default_identity_min_confidence(),
        }
    }
}

/// Retry policy for transient source failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per source per round (first try included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds (doubles each retry)
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Upper bound on a single backoff delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Default run budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "default_max_sources")]
    pub max_sources: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_model_calls")]
    pub max_model_calls: u32,
    #[serde(default = "default_max_cost")]
    pub max_cost: f64,
    #[serde(default = "default_max_wall_clock_secs")]
    pub max_wall_clock_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_sources: default_max_sources(),
            max_pages: default_max_pages(),
            max_model_calls: default_max_model_calls(),
            max_cost: default_max_cost(),
            max_wall_clock_secs: default_max_wall_clock_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_concurrent_runs() -> usize {
    3
}
fn default_crawl_concurrency() -> usize {
    3
}
fn default_sources_per_round() -> usize {
    3
}
fn default_round_timeout_secs() -> u64 {
    120
}
fn default_confidence_threshold() -> f64 {
    0.7
}
fn default_coverage_target() -> f64 {
    0.8
}
fn default_stale_round_limit() -> u32 {
    2
}
fn default_min_new_fields_per_round() -> usize {
    1
}
fn default_identity_min_confidence() -> f64 {
    0.7
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    200
}
fn default_max_backoff_ms() -> u64 {
    5_000
}
fn default_max_rounds() -> u32 {
    4
}
fn default_max_sources() -> u32 {
    24
}
fn default_max_pages() -> u32 {
    120
}
fn default_max_model_calls() -> u32 {
    40
}
fn default_max_cost() -> f64 {
    2.0
}
fn default_max_wall_clock_secs() -> u64 {
    900
}

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine(PathBuf),
    Environment(PathBuf),
    UserFile(PathBuf),
    SystemFile(PathBuf),
    CompiledDefaults,
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject values that would make the orchestrator loop misbehave
    pub fn validate(&self) -> Result<()> {
        let o = &self.orchestrator;
        if o.max_concurrent_runs == 0 || o.crawl_concurrency == 0 || o.sources_per_round == 0 {
            return Err(Error::Config(
                "orchestrator concurrency and sources_per_round must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("confidence_threshold", o.confidence_threshold),
            ("coverage_target", o.coverage_target),
            ("identity_min_confidence", o.identity_min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "orchestrator.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.budget.max_cost < 0.0 {
            return Err(Error::Config("budget.max_cost must not be negative".to_string()));
        }
        Ok(())
    }
}

/// Resolves the effective configuration following the priority order above
pub struct ConfigResolver {
    env_var_name: String,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new(CONFIG_ENV_VAR)
    }
}

impl ConfigResolver {
    pub fn new(env_var_name: &str) -> Self {
        Self {
            env_var_name: env_var_name.to_string(),
        }
    }

    /// Locate the config file without loading it
    pub fn locate(&self, cli_arg: Option<&Path>) -> ConfigSource {
        if let Some(path) = cli_arg {
            return ConfigSource::CommandLine(path.to_path_buf());
        }

        if let Ok(path) = std::env::var(&self.env_var_name) {
            if !path.trim().is_empty() {
                return ConfigSource::Environment(PathBuf::from(path));
            }
        }

        if let Some(user) = dirs::config_dir().map(|d| d.join("specfab").join(CONFIG_FILE_NAME)) {
            if user.exists() {
                return ConfigSource::UserFile(user);
            }
        }

        let system = PathBuf::from("/etc/specfab").join(CONFIG_FILE_NAME);
        if cfg!(unix) && system.exists() {
            return ConfigSource::SystemFile(system);
        }

        ConfigSource::CompiledDefaults
    }

    /// Resolve and load configuration
    ///
    /// An explicitly named file (CLI or ENV) must load successfully. Files
    /// found by directory probing fall back to compiled defaults with a
    /// warning when they cannot be read.
    pub fn resolve(&self, cli_arg: Option<&Path>) -> Result<(TomlConfig, ConfigSource)> {
        let source = self.locate(cli_arg);
        match &source {
            ConfigSource::CommandLine(path) | ConfigSource::Environment(path) => {
                info!("Loading configuration from {}", path.display());
                let config = TomlConfig::load(path)?;
                Ok((config, source))
            }
            ConfigSource::UserFile(path) | ConfigSource::SystemFile(path) => {
                match TomlConfig::load(path) {
                    Ok(config) => {
                        info!("Loaded configuration from {}", path.display());
                        Ok((config, source))
                    }
                    Err(e) => {
                        warn!(
                            "Ignoring unreadable config file {}: {}. Using compiled defaults.",
                            path.display(),
                            e
                        );
                        Ok((TomlConfig::default(), ConfigSource::CompiledDefaults))
                    }
                }
            }
            ConfigSource::CompiledDefaults => {
                debug!("No config file found, using compiled defaults");
                Ok((TomlConfig::default(), source))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TomlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.orchestrator.max_concurrent_runs, 3);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [orchestrator]
            crawl_concurrency = 2

            [budget]
            max_rounds = 6
            "#,
        )
        .unwrap();

        assert_eq!(config.orchestrator.crawl_concurrency, 2);
        assert_eq!(config.orchestrator.sources_per_round, 3);
        assert_eq!(config.budget.max_rounds, 6);
        assert_eq!(config.budget.max_pages, 120);
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let result = TomlConfig::from_toml_str(
            r#"
            [orchestrator]
            coverage_target = 1.5
            "#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_cli_argument_wins() {
        let resolver = ConfigResolver::new("SPECFAB_TEST_UNUSED_VAR");
        let source = resolver.locate(Some(Path::new("/tmp/explicit.toml")));
        assert_eq!(
            source,
            ConfigSource::CommandLine(PathBuf::from("/tmp/explicit.toml"))
        );
    }
}
