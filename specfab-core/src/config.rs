//! Orchestrator settings resolved from the TOML configuration

use crate::orchestrator::RunBudget;
use specfab_common::config::{RetryConfig, TomlConfig};
use std::time::Duration;

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base × 2^(attempt−1), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_backoff.saturating_mul(1u32 << exponent);
        delay.min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Orchestrator knobs shared by every run
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub max_concurrent_runs: usize,
    pub crawl_concurrency: usize,
    pub sources_per_round: usize,
    pub round_timeout: Duration,
    pub confidence_threshold: f64,
    pub coverage_target: f64,
    pub stale_round_limit: u32,
    pub min_new_fields_per_round: usize,
    pub identity_min_confidence: f64,
    pub retry: RetryPolicy,
    /// Budget applied to runs that do not bring their own
    pub default_budget: RunBudget,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&TomlConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &TomlConfig) -> Self {
        let o = &config.orchestrator;
        Self {
            max_concurrent_runs: o.max_concurrent_runs,
            crawl_concurrency: o.crawl_concurrency,
            sources_per_round: o.sources_per_round,
            round_timeout: Duration::from_secs(o.round_timeout_secs),
            confidence_threshold: o.confidence_threshold,
            coverage_target: o.coverage_target,
            stale_round_limit: o.stale_round_limit,
            min_new_fields_per_round: o.min_new_fields_per_round,
            identity_min_confidence: o.identity_min_confidence,
            retry: RetryPolicy::from(&config.retry),
            default_budget: RunBudget::from(&config.budget),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(1000),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_millis(1000));
    }

    #[test]
    fn test_settings_follow_config() {
        let config = TomlConfig::from_toml_str(
            "[orchestrator]\ncrawl_concurrency = 2\nround_timeout_secs = 30\n[budget]\nmax_rounds = 2\n",
        )
        .unwrap();
        let settings = OrchestratorSettings::from_config(&config);
        assert_eq!(settings.crawl_concurrency, 2);
        assert_eq!(settings.round_timeout, Duration::from_secs(30));
        assert_eq!(settings.default_budget.max_rounds, 2);
        assert_eq!(settings.retry.max_attempts, 3);
    }
}
