//! Summarizer agent: condenses a cleaned thread into a summary and the
//! single most important action item.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::AgentSettings;
use crate::error::{AgentError, AgentFailure, ParseFailure, Stage};
use crate::llm::provider::{ChatMessage, CompletionRequest};
use crate::llm::retry::ResilientInvoker;
use crate::pipeline::parser::{ParseOutcome, parse};
use crate::pipeline::types::SummaryResult;

/// Values models use to say "no action item".
const EMPTY_ACTION_MARKERS: &[&str] = &["", "null", "none", "n/a", "na", "no action", "no action item"];

/// Produces a `SummaryResult` from cleaned thread text.
///
/// Never invents a summary: any invocation, parse or validation problem is
/// returned as an `AgentError` for the orchestrator to handle.
pub struct SummarizerAgent {
    invoker: ResilientInvoker,
    settings: AgentSettings,
}

/// Summarizer reply as the model sends it, before validation.
///
/// Both the current and the legacy field names are read, so a reply that
/// carries both is not a duplicate-field error.
#[derive(Debug, Default, Deserialize)]
struct SummaryReply {
    #[serde(default)]
    summary: Option<Value>,
    #[serde(default)]
    thread_summary: Option<Value>,
    #[serde(default)]
    action_item: Option<Value>,
    #[serde(default)]
    latest_action_item: Option<Value>,
}

impl SummarizerAgent {
    pub fn new(invoker: ResilientInvoker, settings: AgentSettings) -> Self {
        Self { invoker, settings }
    }

    pub async fn summarize(&self, cleaned_text: &str) -> Result<SummaryResult, AgentError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_summary_system_prompt()),
            ChatMessage::user(cleaned_text),
        ])
        .with_temperature(self.settings.temperature)
        .with_max_tokens(self.settings.max_tokens);

        let raw = self
            .invoker
            .invoke(request)
            .await
            .map_err(|e| AgentError::new(Stage::Summarizing, e))?;

        let reply = match parse::<SummaryReply>(&raw) {
            ParseOutcome::Parsed(reply) => reply,
            ParseOutcome::Failed(failure) => {
                return Err(AgentError::new(Stage::Summarizing, failure));
            }
        };

        let summary =
            validate_summary(reply, &raw).map_err(|e| AgentError::new(Stage::Summarizing, e))?;

        info!(
            has_action_item = summary.action_item.is_some(),
            chars = summary.summary.len(),
            "Thread summarized"
        );
        debug!(summary = %summary.summary, "Summary text");
        Ok(summary)
    }
}

/// Require a text summary and normalize the action item.
///
/// A missing or non-text summary is a parse failure; a blank one fails
/// validation. The action item is best effort: text is trimmed, a list
/// yields its first text entry, anything else counts as absent.
fn validate_summary(reply: SummaryReply, raw: &str) -> Result<SummaryResult, AgentFailure> {
    let text = [reply.summary, reply.thread_summary]
        .into_iter()
        .flatten()
        .find_map(|value| match value {
            Value::String(text) => Some(text),
            _ => None,
        })
        .ok_or_else(|| {
            AgentFailure::Parse(ParseFailure {
                reason: "reply has no text summary".to_string(),
                raw: raw.to_string(),
            })
        })?;

    let summary = text.trim().to_string();
    if summary.is_empty() {
        return Err(AgentFailure::Validation("summary is empty".to_string()));
    }

    let action_item = reply
        .action_item
        .or(reply.latest_action_item)
        .and_then(action_text);

    Ok(SummaryResult {
        summary,
        action_item,
    })
}

fn action_text(value: Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let text = text.trim();
            if EMPTY_ACTION_MARKERS.contains(&text.to_ascii_lowercase().as_str()) {
                None
            } else {
                Some(text.to_string())
            }
        }
        Value::Array(items) => items.into_iter().find_map(action_text),
        _ => None,
    }
}

/// Build the summarizer system prompt.
fn build_summary_system_prompt() -> String {
    "You are MailMind, a hyper-efficient email assistant.\n\
     You will read an entire email conversation. Messages are separated by \
     lines of the form '--- MESSAGE N ---', oldest first.\n\n\
     Your job:\n\
     - Summarize the conversation in one concise paragraph, focusing on the latest \
     information or outcome.\n\
     - Identify the single most important actionable next step from the final \
     message, if there is one.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"summary\": \"...\", \"action_item\": \"...\"}\n\n\
     Rules:\n\
     - \"summary\" is mandatory and must not be empty\n\
     - Use null for \"action_item\" when nothing needs doing\n\
     - No markdown, no commentary outside the JSON"
        .to_string()
}
