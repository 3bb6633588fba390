//! Extractor agent: priority, one-line summary, topic and bill / receipt /
//! shipping details for a single email.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::AgentSettings;
use crate::error::{AgentError, AgentFailure, ParseFailure, Stage};
use crate::llm::provider::{ChatMessage, CompletionRequest};
use crate::llm::retry::ResilientInvoker;
use crate::pipeline::parser::{ParseOutcome, parse};
use crate::pipeline::types::{ActionableData, EmailInsight, EmailTopic, Priority};

/// Produces an `EmailInsight` for one cleaned email.
pub struct ExtractorAgent {
    invoker: ResilientInvoker,
    settings: AgentSettings,
}

/// Extractor reply as the model sends it, before coercion.
#[derive(Debug, Deserialize)]
struct InsightReply {
    #[serde(default)]
    priority: Option<Value>,
    #[serde(default)]
    summary: Option<Value>,
    #[serde(default)]
    category: Option<Value>,
    #[serde(default)]
    actionable_data: Option<Value>,
}

impl ExtractorAgent {
    pub fn new(invoker: ResilientInvoker, settings: AgentSettings) -> Self {
        Self { invoker, settings }
    }

    pub async fn extract(&self, email_text: &str) -> Result<EmailInsight, AgentError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_extractor_system_prompt()),
            ChatMessage::user(email_text),
        ])
        .with_temperature(self.settings.temperature)
        .with_max_tokens(self.settings.max_tokens);

        let raw = self
            .invoker
            .invoke(request)
            .await
            .map_err(|e| AgentError::new(Stage::Extracting, e))?;

        let reply = match parse::<InsightReply>(&raw) {
            ParseOutcome::Parsed(reply) => reply,
            ParseOutcome::Failed(failure) => {
                return Err(AgentError::new(Stage::Extracting, failure));
            }
        };

        let insight = coerce_reply(reply, &raw).map_err(|e| AgentError::new(Stage::Extracting, e))?;
        info!(
            priority = insight.priority.label(),
            category = insight.category.label(),
            actionable = insight.actionable_data.is_some(),
            "Email analyzed"
        );
        Ok(insight)
    }
}

fn coerce_reply(reply: InsightReply, raw: &str) -> Result<EmailInsight, AgentFailure> {
    let summary = match reply.summary {
        Some(Value::String(text)) => text.trim().to_string(),
        _ => {
            return Err(AgentFailure::Parse(ParseFailure {
                reason: "reply has no text summary".to_string(),
                raw: raw.to_string(),
            }));
        }
    };
    if summary.is_empty() {
        return Err(AgentFailure::Validation("summary is empty".to_string()));
    }

    let priority = match reply.priority.as_ref().and_then(Value::as_str) {
        Some(label) => Priority::from_label(label).unwrap_or_else(|| {
            warn!(label, "Unknown priority, using default");
            Priority::default()
        }),
        None => Priority::default(),
    };

    let category = reply
        .category
        .as_ref()
        .and_then(Value::as_str)
        .and_then(EmailTopic::from_label)
        .unwrap_or_default();

    let actionable_data = match reply.actionable_data {
        Some(Value::Object(fields)) => Some(actionable_from(&fields)).filter(ActionableData::is_actionable),
        _ => None,
    };

    Ok(EmailInsight {
        priority,
        summary,
        category,
        actionable_data,
    })
}

/// Build details from the model's object, clearing fields whose flag is off.
fn actionable_from(fields: &Map<String, Value>) -> ActionableData {
    let flag = |key: &str| matches!(fields.get(key), Some(Value::Bool(true)));
    let text = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
            .map(str::to_string)
    };

    let is_bill = flag("is_bill");
    let is_transaction = flag("is_transaction");
    let is_shipping = flag("is_shipping");

    let due_date = if is_bill {
        text("due_date").and_then(|raw| match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                warn!(due_date = %raw, "Due date not in YYYY-MM-DD form, dropping");
                None
            }
        })
    } else {
        None
    };

    ActionableData {
        is_bill,
        amount_due: text("amount_due").filter(|_| is_bill),
        due_date,
        is_transaction,
        amount: text("amount").filter(|_| is_transaction),
        vendor: text("vendor").filter(|_| is_transaction),
        is_shipping,
        tracking_number: text("tracking_number").filter(|_| is_shipping),
    }
}

fn build_extractor_system_prompt() -> String {
    let priorities: Vec<&str> = Priority::ALL.iter().map(|p| p.label()).collect();
    let topics: Vec<&str> = EmailTopic::ALL.iter().map(|t| t.label()).collect();
    format!(
        "You are MailMind, a hyper-efficient email assistant.\n\
         Read the following email and extract its key data.\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"priority\": \"...\", \"summary\": \"...\", \"category\": \"...\", \
         \"actionable_data\": {{\"is_bill\": false, \"amount_due\": null, \"due_date\": null, \
         \"is_transaction\": false, \"amount\": null, \"vendor\": null, \
         \"is_shipping\": false, \"tracking_number\": null}}}}\n\n\
         Rules:\n\
         - \"priority\" is one of: {priorities}\n\
         - \"category\" is one of: {topics}\n\
         - \"summary\" is one concise sentence; it and \"priority\" are mandatory\n\
         - If the email is not a bill, set \"is_bill\" to false and its fields to null\n\
         - If the email is not a transaction, set \"is_transaction\" to false and its fields to null\n\
         - If the email is not a shipping notice, set \"is_shipping\" to false and its fields to null\n\
         - \"due_date\" uses YYYY-MM-DD; amounts are plain numbers like \"120.50\"\n\
         - Use null for \"actionable_data\" when none of the above apply",
        priorities = priorities.join(", "),
        topics = topics.join(", "),
    )
}
