//! MailMind: email thread summarization and classification core.

pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
