//! Thread analysis pipeline.
//!
//! Every thread flows through:
//! 1. `ThreadCleaner::clean()`: deterministic text normalization (no LLM)
//! 2. `SummarizerAgent::summarize()`: summary plus optional action item
//! 3. `ClassifierAgent::classify()`: category and urgency from the summary
//!
//! `PipelineOrchestrator` sequences the stages. A failed summary fails the
//! analysis; a failed classification only degrades it.
//!
//! `ExtractorAgent::extract()` handles single emails: priority, topic and
//! bill / receipt / shipping details.

pub mod classifier;
pub mod cleaner;
pub mod extractor;
pub mod orchestrator;
pub mod parser;
pub mod summarizer;
pub mod types;

pub use orchestrator::PipelineOrchestrator;
pub use types::{
    ActionableData, AnalysisResult, AnalysisStatus, Category, ClassificationResult, EmailInsight,
    EmailThread, EmailTopic, Priority, SummaryResult, ThreadAnalysis,
};
