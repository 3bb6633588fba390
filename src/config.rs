//! Configuration types.
//!
//! Everything is an explicit value handed to the orchestrator at
//! construction. `from_env` helpers exist for the binary; the library never
//! reads the environment on its own.

use std::str::FromStr;
use std::time::Duration;

use crate::llm::RetryPolicy;
use crate::pipeline::cleaner::{CleanerConfig, DEFAULT_MAX_CHARS};

/// Sampling settings for one agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl AgentSettings {
    /// Summaries need room for a paragraph plus the action item.
    pub fn summarizer() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1024,
        }
    }

    /// Classification is a two-field answer (deterministic-ish).
    pub fn classifier() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 256,
        }
    }

    /// Single-email extraction copies amounts and ids verbatim.
    pub fn extractor() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 512,
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Backoff for rate-limited calls, shared by both agents.
    pub retry: RetryPolicy,
    /// Thread text normalization.
    pub cleaner: CleanerConfig,
    pub summarizer: AgentSettings,
    pub classifier: AgentSettings,
    pub extractor: AgentSettings,
    /// Upper bound on one whole analysis, if any.
    pub analysis_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            cleaner: CleanerConfig::default_rules(),
            summarizer: AgentSettings::summarizer(),
            classifier: AgentSettings::classifier(),
            extractor: AgentSettings::extractor(),
            analysis_timeout: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `MAILMIND_*` environment variables.
    ///
    /// Unparsable values are ignored.
    pub fn from_env() -> Self {
        let max_chars = env_parse("MAILMIND_MAX_PROMPT_CHARS").unwrap_or(DEFAULT_MAX_CHARS);
        let analysis_timeout = env_parse::<u64>("MAILMIND_ANALYSIS_TIMEOUT_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Self {
            retry: RetryPolicy::from_env(),
            cleaner: CleanerConfig::default_rules().with_max_chars(max_chars),
            analysis_timeout,
            ..Self::default()
        }
    }
}

impl RetryPolicy {
    /// Defaults overridden by `MAILMIND_RETRY_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: env_parse("MAILMIND_RETRY_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            base_delay: env_parse("MAILMIND_RETRY_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            backoff_multiplier: env_parse("MAILMIND_RETRY_MULTIPLIER")
                .unwrap_or(defaults.backoff_multiplier),
            max_delay: env_parse("MAILMIND_RETRY_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            jitter: env_parse("MAILMIND_RETRY_JITTER_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.jitter),
        }
        .normalized()
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_built_in_rules() {
        let config = PipelineConfig::default();
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.cleaner.max_chars, DEFAULT_MAX_CHARS);
        assert!(!config.cleaner.footer_rules.is_empty());
        assert!(config.analysis_timeout.is_none());
    }

    #[test]
    fn classifier_is_more_deterministic_than_summarizer() {
        assert!(AgentSettings::classifier().temperature < AgentSettings::summarizer().temperature);
        assert!(AgentSettings::classifier().max_tokens < AgentSettings::summarizer().max_tokens);
    }

    #[test]
    fn retry_policy_from_env_reads_overrides() {
        // SAFETY: only this test touches the MAILMIND_RETRY_* variables.
        unsafe {
            std::env::set_var("MAILMIND_RETRY_MAX_ATTEMPTS", "0");
            std::env::set_var("MAILMIND_RETRY_BASE_DELAY_MS", "50");
            std::env::set_var("MAILMIND_RETRY_MULTIPLIER", "not-a-number");
            std::env::set_var("MAILMIND_RETRY_MAX_DELAY_MS", "400");
            std::env::set_var("MAILMIND_RETRY_JITTER_MS", "0");
        }

        let policy = RetryPolicy::from_env();

        unsafe {
            std::env::remove_var("MAILMIND_RETRY_MAX_ATTEMPTS");
            std::env::remove_var("MAILMIND_RETRY_BASE_DELAY_MS");
            std::env::remove_var("MAILMIND_RETRY_MULTIPLIER");
            std::env::remove_var("MAILMIND_RETRY_MAX_DELAY_MS");
            std::env::remove_var("MAILMIND_RETRY_JITTER_MS");
        }

        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(50));
        assert_eq!(policy.backoff_multiplier, 2.0);
        assert_eq!(policy.max_delay, Duration::from_millis(400));
        assert_eq!(policy.jitter, Duration::ZERO);
    }
}
