//! Classifier agent: picks a category and urgency flag from the subject and
//! the summary produced upstream.

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::AgentSettings;
use crate::error::{AgentError, Stage};
use crate::llm::provider::{ChatMessage, CompletionRequest};
use crate::llm::retry::ResilientInvoker;
use crate::pipeline::parser::{ParseOutcome, parse};
use crate::pipeline::types::{Category, ClassificationResult};

/// Produces a `ClassificationResult` for a summarized thread.
pub struct ClassifierAgent {
    invoker: ResilientInvoker,
    settings: AgentSettings,
}

/// Classifier reply as the model sends it, before coercion.
#[derive(Debug, Deserialize)]
struct ClassificationReply {
    #[serde(default)]
    category: Option<serde_json::Value>,
    #[serde(default)]
    is_urgent: Option<serde_json::Value>,
}

impl ClassifierAgent {
    pub fn new(invoker: ResilientInvoker, settings: AgentSettings) -> Self {
        Self { invoker, settings }
    }

    pub async fn classify(
        &self,
        subject: &str,
        summary: &str,
    ) -> Result<ClassificationResult, AgentError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classifier_system_prompt()),
            ChatMessage::user(build_classifier_user_prompt(subject, summary)),
        ])
        .with_temperature(self.settings.temperature)
        .with_max_tokens(self.settings.max_tokens);

        let raw = self
            .invoker
            .invoke(request)
            .await
            .map_err(|e| AgentError::new(Stage::Classifying, e))?;

        let reply = match parse::<ClassificationReply>(&raw) {
            ParseOutcome::Parsed(reply) => reply,
            ParseOutcome::Failed(failure) => {
                return Err(AgentError::new(Stage::Classifying, failure));
            }
        };

        let classification = coerce_reply(reply);
        info!(
            category = %classification.category,
            is_urgent = classification.is_urgent,
            "Thread classified"
        );
        Ok(classification)
    }
}

/// Map a lenient reply onto the closed category set.
///
/// Unknown or missing categories become the fallback; a missing or
/// non-boolean urgency becomes `false`.
fn coerce_reply(reply: ClassificationReply) -> ClassificationResult {
    let category = match reply.category {
        Some(serde_json::Value::String(label)) => match Category::from_label(&label) {
            Some(category) => category,
            None => {
                warn!(label = %label, "Model chose a category outside the set, using fallback");
                Category::FALLBACK
            }
        },
        Some(other) => {
            warn!(value = %other, "Non-string category, using fallback");
            Category::FALLBACK
        }
        None => Category::FALLBACK,
    };

    let is_urgent = matches!(reply.is_urgent, Some(serde_json::Value::Bool(true)));

    ClassificationResult {
        category,
        is_urgent,
    }
}

/// Build the classifier system prompt.
fn build_classifier_system_prompt() -> String {
    let labels: Vec<&str> = Category::ALL.iter().map(|c| c.label()).collect();
    format!(
        "You are MailMind, a hyper-efficient email classification agent.\n\
         You will read an email thread's subject and summary and classify it into \
         ONE of the following categories:\n\
         {categories}\n\n\
         Rules:\n\
         - Prioritize '{urgent}' if the thread contains a specific deadline, a bill, \
         or a direct question needing a reply\n\
         - Use '{fallback}' when nothing else fits\n\
         - Set \"is_urgent\" to true only if the thread requires an urgent reply or action\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"category\": \"...\", \"is_urgent\": false}}",
        categories = labels.join(", "),
        urgent = Category::UrgentActionRequired.label(),
        fallback = Category::FALLBACK.label(),
    )
}

/// Build the classifier user prompt from the subject and summary.
fn build_classifier_user_prompt(subject: &str, summary: &str) -> String {
    let mut prompt = String::with_capacity(summary.len() + subject.len() + 32);
    let subject = subject.trim();
    if !subject.is_empty() {
        prompt.push_str(&format!("Subject: {}\n", subject));
    }
    prompt.push_str(&format!("Summary: {}", summary.trim()));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::error::{AgentFailure, InvocationErrorKind, LlmError};
    use crate::llm::provider::{CompletionResponse, LlmProvider};
    use crate::llm::retry::RetryPolicy;

    /// Mock LLM that returns a fixed classification response.
    struct MockClassifierLlm {
        response: Result<String, fn() -> LlmError>,
        prompts: Mutex<Vec<CompletionRequest>>,
    }

    impl MockClassifierLlm {
        fn replying(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(response.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing(error: fn() -> LlmError) -> Arc<Self> {
            Arc::new(Self {
                response: Err(error),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for MockClassifierLlm {
        fn model_name(&self) -> &str {
            "mock-classifier"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.prompts.lock().unwrap().push(request);
            match &self.response {
                Ok(content) => Ok(CompletionResponse {
                    content: content.clone(),
                    input_tokens: 10,
                    output_tokens: 5,
                }),
                Err(make) => Err(make()),
            }
        }
    }

    fn agent(llm: Arc<MockClassifierLlm>) -> ClassifierAgent {
        ClassifierAgent::new(
            ResilientInvoker::new(llm, RetryPolicy::no_retry()),
            AgentSettings::classifier(),
        )
    }

    #[tokio::test]
    async fn classify_in_set_category() {
        let llm = MockClassifierLlm::replying(r#"{"category":"University Notice","is_urgent":true}"#);
        let result = agent(llm.clone())
            .classify("Tuition deadline", "Pay tuition by Friday")
            .await
            .unwrap();

        assert_eq!(result.category, Category::UniversityNotice);
        assert!(result.is_urgent);

        let prompts = llm.prompts.lock().unwrap();
        let user = &prompts[0].messages[1].content;
        assert!(user.contains("Subject: Tuition deadline"));
        assert!(user.contains("Summary: Pay tuition by Friday"));
    }

    #[tokio::test]
    async fn out_of_set_category_falls_back() {
        let llm = MockClassifierLlm::replying(r#"{"category":"Finance","is_urgent":false}"#);
        let result = agent(llm).classify("Invoice", "Invoice attached").await.unwrap();
        assert_eq!(result.category, Category::Uncategorized);
        assert_eq!(result.category.label(), "Uncategorized");
    }

    #[tokio::test]
    async fn legacy_other_label_falls_back() {
        let llm = MockClassifierLlm::replying(r#"{"category":"Other","is_urgent":false}"#);
        let result = agent(llm).classify("", "Misc").await.unwrap();
        assert_eq!(result.category, Category::Uncategorized);
    }

    #[tokio::test]
    async fn non_boolean_urgency_becomes_false() {
        for body in [
            r#"{"category":"Personal / Social","is_urgent":"yes"}"#,
            r#"{"category":"Personal / Social","is_urgent":1}"#,
            r#"{"category":"Personal / Social"}"#,
            r#"{"category":"Personal / Social","is_urgent":null}"#,
        ] {
            let llm = MockClassifierLlm::replying(body);
            let result = agent(llm).classify("Dinner", "Dinner tonight?").await.unwrap();
            assert_eq!(result.category, Category::PersonalSocial);
            assert!(!result.is_urgent, "urgency not coerced for {body}");
        }
    }

    #[tokio::test]
    async fn missing_or_non_string_category_falls_back() {
        for body in [r#"{"is_urgent":true}"#, r#"{"category":42,"is_urgent":true}"#] {
            let llm = MockClassifierLlm::replying(body);
            let result = agent(llm).classify("x", "y").await.unwrap();
            assert_eq!(result.category, Category::Uncategorized);
            assert!(result.is_urgent);
        }
    }

    #[tokio::test]
    async fn unparsable_output_is_an_error() {
        let llm = MockClassifierLlm::replying("I think this is spam.");
        let err = agent(llm).classify("x", "y").await.unwrap_err();
        assert_eq!(err.stage, Stage::Classifying);
        assert!(matches!(err.cause, AgentFailure::Parse(_)));
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_is_an_error() {
        let llm = MockClassifierLlm::failing(|| LlmError::RateLimited {
            provider: "mock".into(),
            retry_after: None,
        });
        let err = agent(llm).classify("x", "y").await.unwrap_err();
        assert!(err.is_service_busy());
        match err.cause {
            AgentFailure::Invocation(e) => assert_eq!(e.kind, InvocationErrorKind::RateLimited),
            other => panic!("Expected Invocation failure, got {:?}", other),
        }
    }

    #[test]
    fn system_prompt_lists_every_category() {
        let prompt = build_classifier_system_prompt();
        for category in Category::ALL {
            assert!(prompt.contains(category.label()));
        }
        assert!(prompt.contains("is_urgent"));
    }

    #[test]
    fn user_prompt_omits_blank_subject() {
        let prompt = build_classifier_user_prompt("  ", "Summary text");
        assert_eq!(prompt, "Summary: Summary text");
    }
}
