//! Bridge from rig-core's `CompletionModel` to our `LlmProvider` trait.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use rig::completion::{AssistantContent, CompletionModel, Message};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role,
};

/// A three-digit code introduced by "status", "http", "code" or "error".
static LABELLED_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\bstatus(?:\s*code)?|\bhttp(?:/\d(?:\.\d)?)?|\bcode|\berror)\s*[:=]?\s*(\d{3})\b")
        .unwrap()
});

/// A three-digit code opening the message, as in "429 Too Many Requests".
static LEADING_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{3})\b").unwrap());

/// Phrases providers use in error bodies when throttling.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "resource_exhausted",
    "resource exhausted",
    "rate limit",
    "rate_limit",
    "too many requests",
    "overloaded",
    "quota exceeded",
];

/// Wraps a rig completion model so the pipeline can drive it.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider: "rig".to_string(),
        }
    }

    /// Provider label used in errors and logs.
    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = provider.to_string();
        self
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let preamble = request.system_prompt();
        let mut turns: Vec<Message> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(to_rig_message)
            .collect();

        let prompt = turns.pop().ok_or_else(|| LlmError::RequestFailed {
            provider: self.provider.clone(),
            reason: "completion request has no user message".to_string(),
        })?;

        let mut builder = self.model.completion_request(prompt).messages(turns);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_provider_error(&self.provider, &e.to_string()))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.clone(),
                reason: "reply contained no text".to_string(),
            });
        }

        debug!(
            provider = %self.provider,
            model = %self.model_name,
            chars = content.len(),
            "Completion received"
        );

        Ok(CompletionResponse {
            content,
            input_tokens: saturating_u32(response.usage.input_tokens),
            output_tokens: saturating_u32(response.usage.output_tokens),
        })
    }
}

fn to_rig_message(message: &ChatMessage) -> Message {
    Message::user(message.content.clone())
}

fn saturating_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Map a provider error message onto our error taxonomy.
///
/// rig surfaces HTTP failures as text, so the status code and the provider's
/// error phrasing are recovered from the message.
pub fn classify_provider_error(provider: &str, message: &str) -> LlmError {
    let lower = message.to_lowercase();
    let status = extract_http_status_code(&lower);

    if matches!(status, Some(429 | 529)) || RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        return LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        };
    }

    if matches!(status, Some(401 | 403))
        || lower.contains("unauthorized")
        || lower.contains("invalid api key")
        || lower.contains("api key not valid")
    {
        return LlmError::AuthFailed {
            provider: provider.to_string(),
        };
    }

    LlmError::RequestFailed {
        provider: provider.to_string(),
        reason: message.to_string(),
    }
}

/// HTTP status named in an error message.
///
/// Only a code labelled as a status, or one opening the message, counts, so
/// durations and ids ("after 401ms", "request 500123") are ignored.
fn extract_http_status_code(message: &str) -> Option<u16> {
    LABELLED_STATUS
        .captures(message)
        .or_else(|| LEADING_STATUS.captures(message))
        .and_then(|caps| caps[1].parse::<u16>().ok())
        .filter(|status| (100..600).contains(status))
}
