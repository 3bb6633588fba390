//! Pipeline orchestrator: sequences cleaning, summarizing and classifying
//! into one `AnalysisResult`.
//!
//! Per invocation:
//! 1. Clean the rendered thread text (empty → Failed, no model call)
//! 2. Summarize (failure → Failed, classification not attempted)
//! 3. Classify subject + summary (failure → Degraded, summary kept)
//!
//! `analyze_email` is the single-email path: clean, then one extraction call.
//!
//! Invocations share no mutable state, so any number may run concurrently.
//! Dropping an `analyze` future abandons its in-flight call and any backoff.

use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, error, info, info_span, warn};

use crate::config::PipelineConfig;
use crate::error::{AgentError, AgentFailure, Stage};
use crate::llm::provider::LlmProvider;
use crate::llm::retry::ResilientInvoker;
use crate::pipeline::classifier::ClassifierAgent;
use crate::pipeline::cleaner::{ThreadCleaner, has_readable_content};
use crate::pipeline::extractor::ExtractorAgent;
use crate::pipeline::summarizer::SummarizerAgent;
use crate::pipeline::types::{AnalysisResult, EmailInsight, EmailThread, ThreadAnalysis};

/// Runs the two-agent analysis for email threads.
pub struct PipelineOrchestrator {
    cleaner: ThreadCleaner,
    summarizer: SummarizerAgent,
    classifier: ClassifierAgent,
    extractor: ExtractorAgent,
    analysis_timeout: Option<Duration>,
}

impl PipelineOrchestrator {
    /// Create an orchestrator over one provider.
    pub fn new(llm: Arc<dyn LlmProvider>, config: PipelineConfig) -> Self {
        let invoker = ResilientInvoker::new(llm, config.retry);
        Self {
            cleaner: ThreadCleaner::new(config.cleaner),
            summarizer: SummarizerAgent::new(invoker.clone(), config.summarizer),
            classifier: ClassifierAgent::new(invoker.clone(), config.classifier),
            extractor: ExtractorAgent::new(invoker, config.extractor),
            analysis_timeout: config.analysis_timeout,
        }
    }

    /// Analyze one thread. Always returns a well-formed result.
    ///
    /// Applies the configured analysis timeout, if any.
    pub async fn analyze(&self, thread: &EmailThread) -> AnalysisResult {
        match self.analysis_timeout {
            Some(deadline) => self.analyze_with_deadline(thread, deadline).await,
            None => self.run(thread).await,
        }
    }

    /// Analyze one thread, giving up after `deadline`.
    ///
    /// On expiry the in-flight work is dropped and a failed result returned.
    pub async fn analyze_with_deadline(
        &self,
        thread: &EmailThread,
        deadline: Duration,
    ) -> AnalysisResult {
        match tokio::time::timeout(deadline, self.run(thread)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    thread_id = %thread.id,
                    deadline_ms = deadline.as_millis() as u64,
                    "Analysis timed out"
                );
                AnalysisResult::failed(
                    &thread.id,
                    format!("analysis timed out after {:.1}s", deadline.as_secs_f64()),
                )
            }
        }
    }

    /// Entry point for the request layer: `(thread_id, subject, body)` in,
    /// caller-facing JSON shape out.
    pub async fn process_thread(
        &self,
        thread_id: &str,
        subject: &str,
        body: &str,
    ) -> ThreadAnalysis {
        let thread = EmailThread::new(thread_id, subject, "", vec![body.to_string()]);
        ThreadAnalysis::from(self.analyze(&thread).await)
    }

    /// Extract priority, topic and bill / receipt / shipping details from
    /// one email.
    pub async fn analyze_email(&self, email_text: &str) -> Result<EmailInsight, AgentError> {
        let cleaned = self.cleaner.clean(email_text);
        if !has_readable_content(&cleaned) {
            return Err(AgentError::new(
                Stage::Cleaning,
                AgentFailure::Validation("email has no readable content".to_string()),
            ));
        }

        let span = info_span!("analyze_email", run_id = %uuid::Uuid::new_v4());
        self.extractor.extract(&cleaned).instrument(span).await
    }

    async fn run(&self, thread: &EmailThread) -> AnalysisResult {
        let span = info_span!("analyze", thread_id = %thread.id, run_id = %uuid::Uuid::new_v4());
        self.run_stages(thread).instrument(span).await
    }

    async fn run_stages(&self, thread: &EmailThread) -> AnalysisResult {
        info!(messages = thread.body.len(), "Analyzing thread");

        // Cleaning
        let cleaned = self.cleaner.clean(&thread.render());
        if !has_readable_content(&cleaned) {
            error!(stage = %Stage::Cleaning, "Thread has no content after cleaning");
            return AnalysisResult::failed(&thread.id, "thread has no readable content");
        }

        // Summarizing
        let summary = match self.summarizer.summarize(&cleaned).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(stage = %e.stage, error = %e, "Summarization failed");
                return AnalysisResult::failed(&thread.id, e.user_message());
            }
        };

        // Classifying
        match self.classifier.classify(&thread.subject, &summary.summary).await {
            Ok(classification) => {
                info!(
                    category = %classification.category,
                    is_urgent = classification.is_urgent,
                    "Analysis complete"
                );
                AnalysisResult::done(&thread.id, summary, classification)
            }
            Err(e) => {
                warn!(stage = %e.stage, error = %e, "Classification failed, returning summary only");
                AnalysisResult::degraded(
                    &thread.id,
                    summary,
                    format!("classification unavailable: {}", e.user_message()),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::LlmError;
    use crate::llm::provider::{CompletionRequest, CompletionResponse};
    use crate::llm::retry::RetryPolicy;
    use crate::pipeline::types::{AnalysisStatus, Category};

    /// Mock LLM answering from a queue; empty queue means rate limited.
    struct MockPipelineLlm {
        responses: Mutex<VecDeque<Result<String, LlmError>>>,
        calls: Mutex<usize>,
    }

    impl MockPipelineLlm {
        fn new(responses: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl LlmProvider for MockPipelineLlm {
        fn model_name(&self) -> &str {
            "mock-pipeline"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            *self.calls.lock().unwrap() += 1;
            let next = self.responses.lock().unwrap().pop_front();
            let content = next.unwrap_or_else(|| {
                Err(LlmError::RateLimited {
                    provider: "mock".into(),
                    retry_after: None,
                })
            })?;
            Ok(CompletionResponse {
                content,
                input_tokens: 0,
                output_tokens: 0,
            })
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(10),
                backoff_multiplier: 2.0,
                max_delay: Duration::from_millis(50),
                jitter: Duration::ZERO,
            },
            ..PipelineConfig::default()
        }
    }

    fn thread() -> EmailThread {
        EmailThread::new(
            "thread-1",
            "Tuition payment",
            "bursar@uni.edu",
            vec!["Tuition of $500 is due Friday.".into()],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn empty_thread_fails_without_calling_the_model() {
        let llm = MockPipelineLlm::new(vec![]);
        let orchestrator = PipelineOrchestrator::new(llm.clone(), config());
        let empty = EmailThread::new("thread-2", "Nothing", "", vec!["\u{200B}  \n".into()]);

        let result = orchestrator.analyze(&empty).await;
        assert_eq!(result.status, AnalysisStatus::Failed);
        assert!(result.error.unwrap().contains("no readable content"));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_summarizer_error_fails_without_classifying() {
        let llm = MockPipelineLlm::new(vec![Err(LlmError::AuthFailed {
            provider: "mock".into(),
        })]);
        let orchestrator = PipelineOrchestrator::new(llm.clone(), config());

        let result = orchestrator.analyze(&thread()).await;
        assert!(result.is_failed());
        assert!(result.summary.is_none());
        assert!(result.error.unwrap().contains("AI service error"));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn summarizer_rate_limit_exhaustion_reports_busy() {
        let llm = MockPipelineLlm::new(vec![]);
        let orchestrator = PipelineOrchestrator::new(llm.clone(), config());

        let result = orchestrator.analyze(&thread()).await;
        assert!(result.is_failed());
        assert_eq!(result.error.as_deref(), Some("AI service busy, try again"));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn classifier_parse_failure_degrades() {
        let llm = MockPipelineLlm::new(vec![
            Ok(r#"{"summary": "Tuition due Friday", "action_item": "Pay $500"}"#.into()),
            Ok("Probably a university thing.".into()),
        ]);
        let orchestrator = PipelineOrchestrator::new(llm, config());

        let result = orchestrator.analyze(&thread()).await;
        assert!(result.is_degraded());
        assert!(result.error.is_none());
        assert_eq!(result.summary.unwrap().summary, "Tuition due Friday");
        assert_eq!(result.classification.category, Category::Uncategorized);
        assert!(!result.classification.is_urgent);
        assert!(result.note.unwrap().contains("classification unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_abandons_backoff_and_fails() {
        let llm = MockPipelineLlm::new(vec![]);
        let mut cfg = config();
        cfg.retry.max_attempts = 50;
        cfg.retry.max_delay = Duration::from_secs(10);
        let orchestrator = PipelineOrchestrator::new(llm.clone(), cfg);

        let result = orchestrator
            .analyze_with_deadline(&thread(), Duration::from_millis(100))
            .await;
        assert!(result.is_failed());
        assert!(result.error.unwrap().contains("timed out"));

        let calls_at_timeout = llm.calls();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(llm.calls(), calls_at_timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_timeout_applies_to_analyze() {
        let llm = MockPipelineLlm::new(vec![]);
        let mut cfg = config();
        cfg.retry.max_attempts = 50;
        cfg.analysis_timeout = Some(Duration::from_millis(30));
        let orchestrator = PipelineOrchestrator::new(llm, cfg);

        let result = orchestrator.analyze(&thread()).await;
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn analyze_email_extracts_from_cleaned_text() {
        let llm = MockPipelineLlm::new(vec![Ok(r#"{"priority": "Medium", "summary": "Package on its way.",
            "category": "Purchases",
            "actionable_data": {"is_shipping": true, "tracking_number": "1Z999"}}"#
            .into())]);
        let orchestrator = PipelineOrchestrator::new(llm.clone(), config());

        let insight = orchestrator
            .analyze_email("Your order shipped.\nSent from my iPhone")
            .await
            .unwrap();
        assert_eq!(insight.summary, "Package on its way.");
        let data = insight.actionable_data.unwrap();
        assert!(data.is_shipping);
        assert_eq!(data.tracking_number.as_deref(), Some("1Z999"));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn analyze_email_rejects_empty_text_without_calling_the_model() {
        let llm = MockPipelineLlm::new(vec![]);
        let orchestrator = PipelineOrchestrator::new(llm.clone(), config());

        let err = orchestrator.analyze_email("\u{FEFF}\n  ").await.unwrap_err();
        assert_eq!(err.stage, Stage::Cleaning);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn process_thread_returns_caller_shape() {
        let llm = MockPipelineLlm::new(vec![
            Ok(r#"{"summary": "Dinner tonight", "action_item": null}"#.into()),
            Ok(r#"{"category": "Personal / Social", "is_urgent": false}"#.into()),
        ]);
        let orchestrator = PipelineOrchestrator::new(llm, config());

        let response = orchestrator
            .process_thread("thread-9", "Dinner?", "Hey, you free for dinner tonight?")
            .await;
        assert_eq!(response.thread_id, "thread-9");
        assert_eq!(response.thread_summary, "Dinner tonight");
        assert!(response.latest_action_item.is_none());
        assert_eq!(response.classification.category, Category::PersonalSocial);
        assert!(response.error.is_none());
        assert!(!response.degraded);
    }
}
