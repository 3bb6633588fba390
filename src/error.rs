//! Error types for MailMind.

use std::fmt;
use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// How a failed call to the inference service is treated by the invoker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationErrorKind {
    /// The service signalled resource exhaustion; retried with backoff.
    RateLimited,
    /// Anything else; surfaced on the first occurrence.
    Fatal,
}

impl InvocationErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Fatal => "fatal",
        }
    }
}

/// Terminal outcome of a resilient invocation.
#[derive(Debug, thiserror::Error)]
#[error("{} after {attempts} attempt(s): {source}", .kind.label())]
pub struct InvocationError {
    pub kind: InvocationErrorKind,
    pub attempts: u32,
    #[source]
    pub source: LlmError,
}

impl InvocationError {
    pub fn is_rate_limited(&self) -> bool {
        self.kind == InvocationErrorKind::RateLimited
    }
}

/// Model output that could not be decoded into the expected shape.
///
/// Carries the raw text for diagnostics. This is returned as a value by the
/// parser, never raised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unparsable model output: {reason}")]
pub struct ParseFailure {
    pub reason: String,
    pub raw: String,
}

/// Pipeline stage, used for error attribution and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Cleaning,
    Summarizing,
    Classifying,
    Extracting,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cleaning => "cleaning",
            Self::Summarizing => "summarizing",
            Self::Classifying => "classifying",
            Self::Extracting => "extracting",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Underlying cause of an agent failure.
#[derive(Debug, thiserror::Error)]
pub enum AgentFailure {
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error(transparent)]
    Parse(#[from] ParseFailure),

    #[error("{0}")]
    Validation(String),
}

/// A pipeline agent failed to produce its partial result.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {cause}")]
pub struct AgentError {
    pub stage: Stage,
    #[source]
    pub cause: AgentFailure,
}

impl AgentError {
    pub fn new(stage: Stage, cause: impl Into<AgentFailure>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }

    /// True when the service stayed rate-limited through every retry.
    pub fn is_service_busy(&self) -> bool {
        matches!(&self.cause, AgentFailure::Invocation(e) if e.is_rate_limited())
    }

    /// Message suitable for showing to the person who requested the analysis.
    pub fn user_message(&self) -> String {
        match &self.cause {
            AgentFailure::Invocation(e) if e.is_rate_limited() => {
                "AI service busy, try again".to_string()
            }
            AgentFailure::Invocation(e) => {
                format!("AI service error during {}: {}", self.stage, e.source)
            }
            AgentFailure::Parse(_) => {
                format!("AI response could not be understood during {}", self.stage)
            }
            AgentFailure::Validation(reason) => {
                format!("AI response incomplete during {}: {reason}", self.stage)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_error_display_includes_kind_and_attempts() {
        let err = InvocationError {
            kind: InvocationErrorKind::RateLimited,
            attempts: 4,
            source: LlmError::RateLimited {
                provider: "gemini".into(),
                retry_after: None,
            },
        };
        let text = err.to_string();
        assert!(text.contains("rate_limited"));
        assert!(text.contains("4 attempt"));
    }

    #[test]
    fn busy_message_for_exhausted_rate_limit() {
        let err = AgentError::new(
            Stage::Summarizing,
            InvocationError {
                kind: InvocationErrorKind::RateLimited,
                attempts: 3,
                source: LlmError::RateLimited {
                    provider: "gemini".into(),
                    retry_after: None,
                },
            },
        );
        assert!(err.is_service_busy());
        assert_eq!(err.user_message(), "AI service busy, try again");
    }

    #[test]
    fn parse_failure_message_names_stage() {
        let err = AgentError::new(
            Stage::Summarizing,
            ParseFailure {
                reason: "no JSON object".into(),
                raw: "Sorry".into(),
            },
        );
        assert!(!err.is_service_busy());
        assert!(err.user_message().contains("summarizing"));
        assert!(err.to_string().starts_with("summarizing failed"));
    }
}
